//! Log output for both binaries. Everything goes to stderr so the door
//! panel owns stdout while the terminal is in raw mode.

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;

/// Formatting subscriber writing to `writer`. Dev mode logs at debug level
/// with source locations and thread ids.
pub fn subscriber<W>(dev_mode: bool, writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_max_level(if dev_mode { Level::DEBUG } else { Level::INFO })
        .with_file(dev_mode)
        .with_line_number(dev_mode)
        .with_thread_ids(dev_mode)
        .finish()
}

pub fn setup_logging(dev_mode: bool) {
    subscriber(dev_mode, std::io::stderr).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture(dev_mode: bool) -> String {
        let capture = Capture::default();
        let sink = capture.clone();
        let subscriber = subscriber(dev_mode, move || sink.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("station started");
            tracing::debug!("frame skipped");
        });
        capture.text()
    }

    #[test]
    fn output_goes_to_the_given_writer() {
        let out = capture(false);
        assert!(out.contains("station started"));
        assert!(!out.contains("frame skipped"));
    }

    #[test]
    fn dev_mode_adds_debug_output() {
        let out = capture(true);
        assert!(out.contains("station started"));
        assert!(out.contains("frame skipped"));
    }
}
