use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_DIR: &str = ".cliptranslate_logs";
const LOG_PREFIX: &str = "translator";
const MAX_BYTES: u64 = 5 * 1024 * 1024;
const BACKUPS: usize = 3;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(LOG_DIR)
}

/// File layer at INFO into `~/.cliptranslate_logs`, console layer driven by
/// `RUST_LOG` (default debug).
pub fn init() -> Result<()> {
    let dir = log_dir();
    let file = RollingFile::open(&dir, LOG_PREFIX, MAX_BYTES, BACKUPS)
        .with_context(|| format!("cannot open log file in {}", dir.display()))?;

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_thread_names(true)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(LevelFilter::INFO);

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let console_layer = fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_thread_names(true)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("logger already initialized")?;

    info!("===== ClipTranslate start =====");
    Ok(())
}

/// One file per day (`<prefix>_YYYYMMDD.log`), rotated to `.1`..`.N` when it
/// would grow past `max_bytes`.
pub struct RollingFile {
    dir: PathBuf,
    prefix: String,
    max_bytes: u64,
    backups: usize,
    date: NaiveDate,
    file: File,
    written: u64,
}

impl RollingFile {
    pub fn open(dir: &Path, prefix: &str, max_bytes: u64, backups: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let date = Local::now().date_naive();
        let path = Self::path_for(dir, prefix, date);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            max_bytes,
            backups,
            date,
            file,
            written,
        })
    }

    fn path_for(dir: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
        dir.join(format!("{}_{}.log", prefix, date.format("%Y%m%d")))
    }

    fn current_path(&self) -> PathBuf {
        Self::path_for(&self.dir, &self.prefix, self.date)
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut p = self.current_path().into_os_string();
        p.push(format!(".{}", n));
        PathBuf::from(p)
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.written = self.file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = File::create(self.current_path())?;
            self.written = 0;
            return Ok(());
        }
        let _ = fs::remove_file(self.backup_path(self.backups));
        for n in (1..self.backups).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        fs::rename(self.current_path(), self.backup_path(1))?;
        self.reopen()
    }

    fn roll_if_needed(&mut self, incoming: u64, today: NaiveDate) -> io::Result<()> {
        if today != self.date {
            self.date = today;
            self.reopen()?;
        }
        if self.written > 0 && self.written + incoming > self.max_bytes {
            self.rotate()?;
        }
        Ok(())
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.roll_if_needed(buf.len() as u64, Local::now().date_naive())?;
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn writes_to_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = RollingFile::open(dir.path(), "translator", 1024, 3).unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();

        let expected = format!("translator_{}.log", Local::now().format("%Y%m%d"));
        assert_eq!(files_in(dir.path()), vec![expected.clone()]);
        assert_eq!(fs::read_to_string(dir.path().join(expected)).unwrap(), "hello\n");
    }

    #[test]
    fn rotates_by_size_and_caps_backups() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = RollingFile::open(dir.path(), "t", 10, 2).unwrap();
        for i in 0..6 {
            f.write_all(format!("line-{}\n", i).as_bytes()).unwrap();
        }
        f.flush().unwrap();

        let files = files_in(dir.path());
        assert_eq!(files.len(), 3, "{:?}", files);
        let base = f.current_path();
        assert_eq!(fs::read_to_string(&base).unwrap(), "line-5\n");
        assert_eq!(fs::read_to_string(f.backup_path(1)).unwrap(), "line-4\n");
        assert_eq!(fs::read_to_string(f.backup_path(2)).unwrap(), "line-3\n");
    }

    #[test]
    fn switches_file_when_day_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = RollingFile::open(dir.path(), "t", 1024, 1).unwrap();
        f.write_all(b"today\n").unwrap();

        let tomorrow = f.date.succ_opt().unwrap();
        f.roll_if_needed(0, tomorrow).unwrap();
        f.file.write_all(b"tomorrow\n").unwrap();

        assert_eq!(files_in(dir.path()).len(), 2);
        assert_eq!(fs::read_to_string(f.current_path()).unwrap(), "tomorrow\n");
    }
}
