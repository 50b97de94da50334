//! Resolved configuration consumed by the decoders and the task pool.
//!
//! Loading configuration is the embedding application's job. These structs
//! derive [`serde::Deserialize`] so any loader can bind them, and expose
//! builder-style setters that clamp values into supported ranges.

use std::{collections::HashMap, num::NonZeroUsize, path::PathBuf, time::Duration};

use serde::Deserialize;

/// Smallest accepted maximum line length.
pub const MIN_LINE_LENGTH: usize = 256;
/// Largest accepted maximum line length (1 MiB).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

pub(crate) fn clamp_line_length(value: usize) -> usize {
    value.clamp(MIN_LINE_LENGTH, MAX_LINE_LENGTH)
}

/// Character set used to turn header values and form fields into text.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Charset {
    /// UTF-8; invalid sequences are replaced with U+FFFD.
    #[default]
    Utf8,
    /// ISO-8859-1, where every byte maps to the code point of the same value.
    Latin1,
}

impl Charset {
    /// Decode `bytes` into an owned string.
    ///
    /// ```
    /// use wirechain::config::Charset;
    ///
    /// assert_eq!(Charset::Latin1.decode(&[0x63, 0x61, 0x66, 0xe9]), "café");
    /// assert_eq!(Charset::Utf8.decode("café".as_bytes()), "café");
    /// ```
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Limits and resources used by the HTTP and WebSocket decoders.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    charset: Charset,
    max_line_length: usize,
    max_headers: usize,
    max_body_size: u64,
    spill_threshold: usize,
    spill_dir: PathBuf,
    max_form_fields: usize,
    max_pipelined: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            charset: Charset::Utf8,
            max_line_length: 8 * 1024,
            max_headers: 100,
            max_body_size: 16 * 1024 * 1024,
            spill_threshold: 64 * 1024,
            spill_dir: std::env::temp_dir(),
            max_form_fields: 1000,
            max_pipelined: 64 * 1024,
        }
    }
}

impl DecoderConfig {
    /// Set the character set used for text decoding.
    #[must_use]
    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Set the maximum request/header line length, clamped to
    /// [`MIN_LINE_LENGTH`]..=[`MAX_LINE_LENGTH`].
    #[must_use]
    pub fn max_line_length(mut self, len: usize) -> Self {
        self.max_line_length = clamp_line_length(len);
        self
    }

    /// Set the maximum number of header lines per message.
    #[must_use]
    pub fn max_headers(mut self, count: usize) -> Self {
        self.max_headers = count.max(1);
        self
    }

    /// Set the maximum declared body size.
    #[must_use]
    pub fn max_body_size(mut self, size: u64) -> Self {
        self.max_body_size = size;
        self
    }

    /// Set the in-memory size above which bodies and uploads spill to disk.
    #[must_use]
    pub fn spill_threshold(mut self, bytes: usize) -> Self {
        self.spill_threshold = bytes;
        self
    }

    /// Set the directory used for spill files.
    #[must_use]
    pub fn spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = dir.into();
        self
    }

    /// Set the maximum number of form fields (url-encoded pairs or multipart parts).
    #[must_use]
    pub fn max_form_fields(mut self, count: usize) -> Self {
        self.max_form_fields = count.max(1);
        self
    }

    /// Set how many bytes may queue behind a request awaiting its response.
    #[must_use]
    pub fn max_pipelined(mut self, bytes: usize) -> Self {
        self.max_pipelined = bytes;
        self
    }

    /// Configured character set.
    #[must_use]
    pub fn get_charset(&self) -> Charset { self.charset }

    /// Effective maximum line length.
    #[must_use]
    pub fn get_max_line_length(&self) -> usize { clamp_line_length(self.max_line_length) }

    /// Maximum number of header lines.
    #[must_use]
    pub fn get_max_headers(&self) -> usize { self.max_headers }

    /// Maximum declared body size.
    #[must_use]
    pub fn get_max_body_size(&self) -> u64 { self.max_body_size }

    /// Spill threshold in bytes.
    #[must_use]
    pub fn get_spill_threshold(&self) -> usize { self.spill_threshold }

    /// Spill directory.
    #[must_use]
    pub fn get_spill_dir(&self) -> &PathBuf { &self.spill_dir }

    /// Maximum number of form fields.
    #[must_use]
    pub fn get_max_form_fields(&self) -> usize { self.max_form_fields }

    /// Ceiling on bytes buffered while a request awaits its response.
    #[must_use]
    pub fn get_max_pipelined(&self) -> usize { self.max_pipelined }
}

/// Limits applied by the WebSocket frame decoder.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Largest accepted frame payload.
    pub max_payload: u64,
    /// Reject client frames that carry no masking key.
    pub require_mask: bool,
    /// Answer pings automatically instead of forwarding them.
    pub auto_pong: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_payload: 16 * 1024 * 1024,
            require_mask: true,
            auto_pong: true,
        }
    }
}

/// Sizing and health settings for [`crate::taskgroup::TaskPool`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    workers: usize,
    default_group_limit: usize,
    group_limits: HashMap<String, usize>,
    slow_task_threshold: Option<Duration>,
    monitor_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            default_group_limit: 4,
            group_limits: HashMap::new(),
            slow_task_threshold: None,
            monitor_interval: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Set the number of worker tasks.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Set the limit used for groups without an explicit entry.
    #[must_use]
    pub fn default_group_limit(mut self, limit: usize) -> Self {
        self.default_group_limit = limit.max(1);
        self
    }

    /// Set the concurrency limit for one named group.
    #[must_use]
    pub fn group_limit(mut self, group: impl Into<String>, limit: usize) -> Self {
        self.group_limits.insert(group.into(), limit.max(1));
        self
    }

    /// Report tasks running longer than `threshold`.
    #[must_use]
    pub fn slow_task_threshold(mut self, threshold: Duration) -> Self {
        self.slow_task_threshold = Some(threshold);
        self
    }

    /// Set how often the monitor checks for dead workers.
    #[must_use]
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Configured worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize { self.workers.max(1) }

    /// Resolve the concurrency limit for `group`.
    #[must_use]
    pub fn limit_for(&self, group: &str) -> usize {
        self.group_limits
            .get(group)
            .copied()
            .unwrap_or(self.default_group_limit)
            .max(1)
    }

    /// Slow-task reporting threshold, if any.
    #[must_use]
    pub fn get_slow_task_threshold(&self) -> Option<Duration> { self.slow_task_threshold }

    /// Dead-worker scan interval.
    #[must_use]
    pub fn get_monitor_interval(&self) -> Duration {
        self.monitor_interval.max(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, MIN_LINE_LENGTH)]
    #[case(4096, 4096)]
    #[case(usize::MAX, MAX_LINE_LENGTH)]
    fn line_length_is_clamped(#[case] requested: usize, #[case] expected: usize) {
        let cfg = DecoderConfig::default().max_line_length(requested);
        assert_eq!(cfg.get_max_line_length(), expected);
    }

    #[test]
    fn group_limits_fall_back_to_default() {
        let cfg = PoolConfig::default()
            .default_group_limit(3)
            .group_limit("db", 1);
        assert_eq!(cfg.limit_for("db"), 1);
        assert_eq!(cfg.limit_for("cache"), 3);
    }

    #[test]
    fn zero_limits_are_raised_to_one() {
        let cfg = PoolConfig::default().group_limit("db", 0).workers(0);
        assert_eq!(cfg.limit_for("db"), 1);
        assert_eq!(cfg.worker_count(), 1);
    }

    #[test]
    fn decoder_config_deserializes_with_defaults() {
        let cfg: DecoderConfig =
            serde_json::from_str(r#"{"charset":"latin1","max_headers":10}"#).expect("valid json");
        assert_eq!(cfg.get_charset(), Charset::Latin1);
        assert_eq!(cfg.get_max_headers(), 10);
        assert_eq!(cfg.get_max_line_length(), 8 * 1024);
    }
}
