use directories::ProjectDirs;
use ini::Ini;
use log::LevelFilter;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::error::{KaraokeError, Result};
use crate::karaoke::{DEFAULT_TAG_PATTERN, RenderOptions};

const LOGGING_SECTION: &str = "Logging";
const TEMPLATER_SECTION: &str = "Templater";

/// 设置界面中控件的种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    TextEdit,
    /// 从脚本已有样式中选择，空值表示全部样式。
    StyleDropdown,
    Checkbox,
}

/// 模板设置的字段定义：字段名 → 控件种类 → 约束。
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum ConfigField {
    Template,
    Style,
    Strip,
    TagPattern,
}

impl ConfigField {
    /// INI 文件中的键名。
    pub fn key(self) -> &'static str {
        match self {
            ConfigField::Template => "Template",
            ConfigField::Style => "Style",
            ConfigField::Strip => "Strip",
            ConfigField::TagPattern => "TagPattern",
        }
    }

    pub fn control(self) -> ControlKind {
        match self {
            ConfigField::Template | ConfigField::TagPattern => ControlKind::TextEdit,
            ConfigField::Style => ControlKind::StyleDropdown,
            ConfigField::Strip => ControlKind::Checkbox,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConfigField::Template => "模板",
            ConfigField::Style => "样式",
            ConfigField::Strip => "去除标签",
            ConfigField::TagPattern => "标签匹配模式",
        }
    }

    /// 检查字段取值是否满足约束。
    fn check(self, config: &TemplaterConfig) -> std::result::Result<(), String> {
        match self {
            ConfigField::Template if config.template.is_empty() => {
                Err("模板不能为空".to_string())
            }
            ConfigField::TagPattern => Regex::new(&config.tag_pattern)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }
}

/// 卡拉OK模板宏的配置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplaterConfig {
    pub template: String,
    /// 空字符串表示处理所有样式。
    pub style: String,
    pub strip: bool,
    pub tag_pattern: String,
}

impl Default for TemplaterConfig {
    fn default() -> Self {
        Self {
            template: "%$start%".to_string(),
            style: String::new(),
            strip: false,
            tag_pattern: DEFAULT_TAG_PATTERN.to_string(),
        }
    }
}

impl TemplaterConfig {
    pub fn validate(&self) -> Result<()> {
        for field in ConfigField::iter() {
            field.check(self).map_err(|reason| {
                KaraokeError::InvalidConfig(format!("{}: {reason}", field.label()))
            })?;
        }
        Ok(())
    }

    pub fn render_options(&self) -> Result<RenderOptions> {
        self.validate()?;
        RenderOptions::new(self.template.clone(), self.strip).with_tag_pattern(&self.tag_pattern)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub enable_file_log: bool,
    pub file_log_level: LevelFilter,
    pub console_log_level: LevelFilter,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            enable_file_log: false,
            file_log_level: LevelFilter::Info,
            console_log_level: LevelFilter::Warn,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppSettings {
    pub log_settings: LogSettings,
    pub templater: TemplaterConfig,
}

fn parse_or<T: FromStr>(value: Option<&str>, key: &str, default: T) -> T {
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("配置项 {key} 的值 '{raw}' 无效，使用默认值");
            default
        }),
    }
}

impl AppSettings {
    pub fn config_path() -> Option<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("com", "KaraTemplater", "KaraTemplater") {
            let config_dir = proj_dirs.data_local_dir();
            if !config_dir.exists() {
                if let Err(e) = fs::create_dir_all(config_dir) {
                    log::error!("无法创建配置目录 {config_dir:?}: {e}");
                    return None;
                }
            }
            Some(config_dir.join("kara_templater.ini"))
        } else {
            log::error!("无法获取项目配置目录路径。");
            None
        }
    }

    /// 从默认位置加载配置，首次运行时写入默认配置。
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            log::warn!("无法确定配置文件路径。将使用运行时默认配置。");
            return AppSettings::default();
        };

        if !path.exists() {
            log::info!("配置文件 {path:?} 未找到。将创建并使用默认配置。");
            let default_settings = AppSettings::default();
            if let Err(e) = default_settings.save_to(&path) {
                log::error!("无法保存初始默认配置文件到 {path:?}: {e}");
            }
            return default_settings;
        }

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("加载配置文件 {path:?} 失败: {e}。将使用默认配置。");
                AppSettings::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let conf = Ini::load_from_file(path)?;
        let defaults = AppSettings::default();

        let log_section = conf.section(Some(LOGGING_SECTION));
        let log_get = |key: &str| log_section.and_then(|s| s.get(key));
        let log_settings = LogSettings {
            enable_file_log: parse_or(
                log_get("EnableFileLog"),
                "EnableFileLog",
                defaults.log_settings.enable_file_log,
            ),
            file_log_level: parse_or(
                log_get("FileLogLevel"),
                "FileLogLevel",
                defaults.log_settings.file_log_level,
            ),
            console_log_level: parse_or(
                log_get("ConsoleLogLevel"),
                "ConsoleLogLevel",
                defaults.log_settings.console_log_level,
            ),
        };

        let mut templater = defaults.templater;
        if let Some(section) = conf.section(Some(TEMPLATER_SECTION)) {
            for field in ConfigField::iter() {
                let Some(raw) = section.get(field.key()) else {
                    continue;
                };
                match field {
                    ConfigField::Template => templater.template = raw.to_string(),
                    ConfigField::Style => templater.style = raw.to_string(),
                    ConfigField::Strip => {
                        templater.strip = parse_or(Some(raw), field.key(), templater.strip);
                    }
                    ConfigField::TagPattern => templater.tag_pattern = raw.to_string(),
                }
            }
        }

        log::info!("从 {path:?} 加载配置成功。");
        Ok(AppSettings {
            log_settings,
            templater,
        })
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or_else(|| {
            KaraokeError::InvalidConfig("无法确定配置文件路径，保存失败。".to_string())
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut conf = Ini::new();
        conf.with_section(Some(LOGGING_SECTION))
            .set(
                "EnableFileLog",
                self.log_settings.enable_file_log.to_string(),
            )
            .set("FileLogLevel", self.log_settings.file_log_level.to_string())
            .set(
                "ConsoleLogLevel",
                self.log_settings.console_log_level.to_string(),
            );

        for field in ConfigField::iter() {
            let value = match field {
                ConfigField::Template => self.templater.template.clone(),
                ConfigField::Style => self.templater.style.clone(),
                ConfigField::Strip => self.templater.strip.to_string(),
                ConfigField::TagPattern => self.templater.tag_pattern.clone(),
            };
            conf.with_section(Some(TEMPLATER_SECTION))
                .set(field.key(), value);
        }

        conf.write_to_file(path)?;
        log::info!("配置已保存到 {path:?}。");
        Ok(())
    }
}
