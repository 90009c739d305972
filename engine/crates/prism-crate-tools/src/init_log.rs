use std::io::Write;

/// 通过该环境变量覆盖默认的日志过滤规则，语法与 `RUST_LOG` 相同
pub const LOG_FILTER_ENV: &str = "PRISM_LOG";

fn builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.format(|buf, record| {
        let level_style = match record.level() {
            log::Level::Error => buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
            log::Level::Warn => buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
            log::Level::Info => buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
            level => buf.default_level_style(level),
        };
        let dim_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

        let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
        let line = record.line().unwrap_or(0);
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("-");
        let time = chrono::Local::now().format("%H:%M:%S%.3f");

        writeln!(
            buf,
            "{level_style}[{time}] {:5}{level_style:#} {dim_style}[{thread_name}] [{file}:{line}]{dim_style:#} {}",
            record.level(),
            record.args()
        )
    });

    builder.filter(None, log::LevelFilter::Info);
    if let Ok(filters) = std::env::var(LOG_FILTER_ENV) {
        builder.parse_filters(&filters);
    }
    builder
}

/// 初始化全局 logger，只能调用一次
///
/// 每条日志带有线程名，方便区分 submitter 线程与各个 worker 线程
pub fn init_log() {
    builder().init();
}

/// 测试使用：可以被多个测试重复调用，输出交给 test harness 捕获
pub fn init_test_log() {
    let _ = builder().is_test(true).try_init();
}
