//! 打印到标准错误的日志后端，级别由编译期的 `KERNEL_CLOG` 环境变量决定

use std::io::Write;

use anstyle::{AnsiColor, Reset};
use klocks::{Lazy, Once};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// a simple logger
struct SimpleLogger {
    clog: LevelFilter,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.clog
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => AnsiColor::Red,
            Level::Warn => AnsiColor::BrightYellow,
            Level::Info => AnsiColor::Blue,
            Level::Debug => AnsiColor::Green,
            Level::Trace => AnsiColor::BrightBlack,
        };
        // 日志写不出去也没有更好的地方可以报告了
        let _ = writeln!(
            std::io::stderr().lock(),
            "{}[{:>5}]{} {}",
            color.render_fg(),
            record.level(),
            Reset.render(),
            record.args(),
        );
    }

    fn flush(&self) {}
}

const fn decide_log_level(level_str: Option<&str>) -> LevelFilter {
    const fn str_eq(lhs: &str, rhs: &str) -> bool {
        let lhs = lhs.as_bytes();
        let rhs = rhs.as_bytes();

        if lhs.len() != rhs.len() {
            return false;
        }
        let mut i = 0;
        while i < lhs.len() {
            if lhs[i] != rhs[i] {
                return false;
            }
            i += 1;
        }
        true
    }

    if let Some(level_str) = level_str {
        if str_eq(level_str, "TRACE") {
            LevelFilter::Trace
        } else if str_eq(level_str, "DEBUG") {
            LevelFilter::Debug
        } else if str_eq(level_str, "INFO") {
            LevelFilter::Info
        } else if str_eq(level_str, "WARN") {
            LevelFilter::Warn
        } else if str_eq(level_str, "ERROR") {
            LevelFilter::Error
        } else {
            LevelFilter::Off
        }
    } else {
        LevelFilter::Off
    }
}

pub const CLOG: LevelFilter = decide_log_level(option_env!("KERNEL_CLOG"));

/// initiate logger，可以重复调用
pub fn init() {
    static LOGGER: Lazy<SimpleLogger> = Lazy::new(|| SimpleLogger { clog: CLOG });
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // 其他地方可能已经装好了 logger，这时沿用它
        if log::set_logger(&*LOGGER).is_ok() {
            log::set_max_level(LOGGER.clog);
        }
    });
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use super::decide_log_level;

    #[test]
    fn level_from_env_string() {
        assert_eq!(decide_log_level(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(decide_log_level(Some("WARN")), LevelFilter::Warn);
        assert_eq!(decide_log_level(Some("warn")), LevelFilter::Off);
        assert_eq!(decide_log_level(None), LevelFilter::Off);
    }

    #[test]
    fn init_twice() {
        super::init();
        super::init();
        log::info!("logger initialized");
    }
}
