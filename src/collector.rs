use crate::errors::*;
use crate::Message;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use snafu::ResultExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Stores received messages as individual files in a directory.
///
/// Files are named `<prefix><n>`, where the prefix is six characters of a random uuid followed by
/// `_`, and `n` counts up from 0. Existing files are never overwritten.
#[derive(Debug)]
pub struct Collector {
    dir: PathBuf,
    prefix: String,
    count: u64,
}

impl Collector {
    /// Collects into `dir`, creating it if needed.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Collector> {
        let dir = dir.into();
        fs::create_dir_all(&dir).context(CreateDirSnafu { path: &dir })?;

        let mut prefix = Uuid::new_v4().to_string();
        prefix.truncate(6);
        prefix.push('_');

        info!(
            "storing messages in folder: {}, with prefix: {}",
            dir.display(),
            prefix
        );
        Ok(Collector {
            dir,
            prefix,
            count: 0,
        })
    }

    /// Collects into a new temporary directory that is kept after the collector is gone.
    pub fn in_temp_dir() -> Result<Collector> {
        let dir = tempfile::Builder::new()
            .prefix("amqp-collector")
            .tempdir()
            .context(CreateDirSnafu {
                path: std::env::temp_dir(),
            })?;
        Collector::new(dir.into_path())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The number of messages handed to [`store`](#method.store) so far, including failed ones.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Writes `message` to the next file and returns its path.
    pub fn store(&mut self, message: &Message) -> Result<PathBuf> {
        // the number is used up even if writing fails, so a bad file name is not retried
        let path = self.dir.join(format!("{}{}", self.prefix, self.count));
        self.count += 1;
        let contents = render(message, Utc::now());

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .context(StoreSnafu { path: &path })?;
        file.write_all(contents.as_bytes())
            .context(StoreSnafu { path: &path })?;

        debug!("stored {} in {}", message, path.display());
        Ok(path)
    }
}

/// The file contents for `message` received at `timestamp`.
pub fn render(message: &Message, timestamp: DateTime<Utc>) -> String {
    let annotations = message
        .annotations()
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    let content_type = message
        .content_type()
        .map(|content_type| content_type.to_string())
        .unwrap_or_default();

    format!(
        "{}\nannotations={{{}}}\nsubject={}\nContent-Type={}\n\n{}\n",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        annotations,
        message.subject().unwrap_or_default(),
        content_type,
        message.body_text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentType;
    use chrono::TimeZone;

    #[test]
    fn render_layout() {
        let message = Message::new("<test>hi</test>")
            .with_content_type(ContentType::APPLICATION_XML)
            .with_subject("alerts")
            .with_annotation("b", "2")
            .with_annotation("a", "1");
        let timestamp = Utc.with_ymd_and_hms(2016, 7, 1, 12, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);

        assert_eq!(
            render(&message, timestamp),
            "2016-07-01T12:30:00.250Z\n\
             annotations={a=1, b=2}\n\
             subject=alerts\n\
             Content-Type=application/xml\n\
             \n\
             <test>hi</test>\n"
        );
    }

    #[test]
    fn render_bare_message() {
        let timestamp = Utc.with_ymd_and_hms(2016, 7, 1, 0, 0, 0).unwrap();
        let rendered = render(&Message::new("body"), timestamp);
        assert!(rendered.contains("annotations={}\nsubject=\nContent-Type=\n\nbody\n"));
    }

    #[test]
    fn store_numbers_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = Collector::new(dir.path().join("nested")).unwrap();
        assert_eq!(collector.prefix().len(), 7);
        assert!(collector.prefix().ends_with('_'));

        let first = collector.store(&Message::new("one")).unwrap();
        let second = collector.store(&Message::new("two")).unwrap();
        assert_eq!(collector.count(), 2);
        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            format!("{}0", collector.prefix())
        );
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            format!("{}1", collector.prefix())
        );
        assert!(fs::read_to_string(&second).unwrap().ends_with("\n\ntwo\n"));
    }

    #[test]
    fn store_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = Collector::new(dir.path()).unwrap();
        let taken = dir.path().join(format!("{}0", collector.prefix()));
        fs::write(&taken, "keep me").unwrap();

        match collector.store(&Message::new("new")) {
            Err(Error::Store { path, .. }) => assert_eq!(path, taken),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(collector.count(), 1);
        assert_eq!(fs::read_to_string(&taken).unwrap(), "keep me");

        let next = collector.store(&Message::new("new")).unwrap();
        assert_eq!(next, dir.path().join(format!("{}1", collector.prefix())));
        assert_eq!(collector.count(), 2);
    }

    #[test]
    fn temp_dir_is_kept() {
        let mut collector = Collector::in_temp_dir().unwrap();
        let dir = collector.dir().to_path_buf();
        assert!(dir
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("amqp-collector"));

        let path = collector.store(&Message::new("kept")).unwrap();
        drop(collector);
        assert!(path.exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
