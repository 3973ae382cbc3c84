use chrono::Local;
use directories::ProjectDirs;
use fern::Dispatch;
use std::fs;
use std::path::PathBuf;

use crate::app_settings::LogSettings;

fn get_log_file_path() -> Result<PathBuf, String> {
    if let Some(proj_dirs) = ProjectDirs::from("com", "KaraTemplater", "KaraTemplater") {
        let log_dir = proj_dirs.data_local_dir();
        if !log_dir.exists() {
            fs::create_dir_all(log_dir)
                .map_err(|e| format!("无法创建日志目录 {log_dir:?}: {e}"))?;
        }
        Ok(log_dir.join("kara_templater.log"))
    } else {
        Ok(PathBuf::from("kara_templater.log"))
    }
}

fn format_dispatch() -> Dispatch {
    Dispatch::new().format(|out, message, record| {
        out.finish(format_args!(
            "[{}][{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S.%3f"),
            record.level(),
            message
        ))
    })
}

/// 初始化全局日志：控制台输出到 stderr，按设置决定是否同时写入日志文件。
pub fn init_global_logger(settings: &LogSettings) {
    let console_dispatch = Dispatch::new()
        .level(settings.console_log_level)
        .chain(std::io::stderr());

    let mut final_dispatch = format_dispatch().chain(console_dispatch);

    if settings.enable_file_log {
        match get_log_file_path().and_then(|path| {
            fern::log_file(&path)
                .map(|file| (path.clone(), file))
                .map_err(|e| format!("无法打开日志文件 {path:?}: {e}"))
        }) {
            Ok((path, log_file)) => {
                final_dispatch = final_dispatch.chain(
                    Dispatch::new()
                        .level(settings.file_log_level)
                        .chain(log_file),
                );
                eprintln!("[Logger Init] 文件日志已启用: {path:?}");
            }
            Err(e) => {
                eprintln!("{e}。文件日志将被禁用。");
            }
        }
    }

    if let Err(e) = final_dispatch.apply() {
        eprintln!("日志记录器初始化失败: {e}");
    } else {
        log::debug!("日志记录器已初始化。");
    }
}
