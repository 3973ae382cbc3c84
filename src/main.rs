use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use kara_templater::app_settings::AppSettings;
use kara_templater::ass_file::{AssDocument, apply_template};
use kara_templater::karaoke::scan;
use kara_templater::{KaraokeError, Syllable, logger};

/// 对 ASS 字幕中的卡拉OK音节逐个套用模板
#[derive(Parser, Debug)]
#[command(name = "kara-templater", version)]
struct Cli {
    /// 输入的 .ass 文件
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// 输出文件，省略时写到标准输出
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 模板，例如 "%$start%" 或 "$text"
    #[arg(short, long)]
    template: Option<String>,

    /// 只处理该样式的行，空字符串表示全部
    #[arg(short, long)]
    style: Option<String>,

    /// 去除原有标签，只保留计算结果与纯文本
    #[arg(long)]
    strip: bool,

    /// 非 strip 模式下用于就地替换的正则
    #[arg(long)]
    tag_pattern: Option<String>,

    /// 把本次使用的模板设置保存为默认值
    #[arg(long)]
    save_settings: bool,

    /// 只输出被选中行的音节列表 (JSON)，不做渲染
    #[arg(long)]
    dump_syllables: bool,
}

#[derive(serde::Serialize)]
struct LineDump<'a> {
    line: usize,
    syllables: &'a [Syllable],
}

fn run(cli: Cli, mut settings: AppSettings) -> Result<bool, KaraokeError> {
    if let Some(template) = cli.template {
        settings.templater.template = template;
    }
    if let Some(style) = cli.style {
        settings.templater.style = style;
    }
    if cli.strip {
        settings.templater.strip = true;
    }
    if let Some(pattern) = cli.tag_pattern {
        settings.templater.tag_pattern = pattern;
    }
    settings.templater.validate()?;

    if cli.save_settings {
        settings.save()?;
    }

    let content = fs::read_to_string(&cli.input)?;
    let mut doc = AssDocument::parse(&content);
    log::info!("已读取 {:?}，共 {} 行", cli.input, doc.lines.len());

    let (output, success) = if cli.dump_syllables {
        let mut dumps = Vec::new();
        for (line_number, line) in doc.selected_lines_mut(&settings.templater.style) {
            let syllables = scan(line)?;
            if !syllables.is_empty() {
                let json = serde_json::to_string(&LineDump {
                    line: line_number,
                    syllables,
                })
                .map_err(std::io::Error::other)?;
                dumps.push(json);
            }
        }
        (dumps.join("\n") + "\n", true)
    } else {
        let report = apply_template(&mut doc, &settings.templater)?;
        for failure in &report.failures {
            log::error!("第 {} 行: {}", failure.line_number, failure.error);
        }
        (doc.to_ass_string(), report.is_success())
    };

    match cli.output {
        Some(path) => fs::write(&path, output)?,
        None => print!("{output}"),
    }
    Ok(success)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = AppSettings::load();
    logger::init_global_logger(&settings.log_settings);

    match run(cli, settings) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
