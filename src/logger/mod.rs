use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// 初始化终端日志，只输出本crate的日志，写到stderr
pub fn init_logger(level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .add_filter_allow_str("rsubrecon")
        .build();

    // 重复初始化时保留已有的logger
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
}
