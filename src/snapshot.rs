//! Frontend screenshots delivered through a one-shot callback.

use base64::Engine;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::protocol::{Message, SnapshotRequest};
use crate::window::{Window, WindowError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot callback carried no data URL")]
    Missing,
    #[error("not a base64 data URL")]
    NotDataUrl,
    #[error("invalid base64 payload: {0}")]
    Decode(String),
}

/// A decoded screenshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Media type from the data URL, e.g. `image/png`.
    pub mime: String,
    pub data: Vec<u8>,
}

/// Decode a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Result<Snapshot, SnapshotError> {
    let rest = url.strip_prefix("data:").ok_or(SnapshotError::NotDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(SnapshotError::NotDataUrl)?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or(SnapshotError::NotDataUrl)?;
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| SnapshotError::Decode(e.to_string()))?;
    Ok(Snapshot {
        mime: mime.to_string(),
        data,
    })
}

pub type SnapshotReceiver = oneshot::Receiver<Result<Snapshot, SnapshotError>>;

impl Window {
    /// Ask the frontend for a screenshot, optionally at `[width, height]`.
    ///
    /// The receiver resolves once the frontend answers. It is dropped
    /// unanswered if the window closes first.
    pub fn request_snapshot(&mut self, size: Option<[u32; 2]>) -> Result<SnapshotReceiver, WindowError> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let cbid = self.register_callback(
            move |_: &mut Window, args: &[Value]| {
                let result = match args.first().and_then(Value::as_str) {
                    Some(url) => decode_data_url(url),
                    None => Err(SnapshotError::Missing),
                };
                if let Some(tx) = tx.lock().take() {
                    // The requester may have given up; nothing to do then.
                    let _ = tx.send(result);
                }
                Ok(())
            },
            false,
        );
        self.send(Message::Snapshot(SnapshotRequest {
            callback: (&cbid).into(),
            size,
        }))?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CallbackInvocation;
    use crate::sink::MemorySink;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn decodes_png_data_url() {
        let snap = decode_data_url("data:image/png;base64,iVBORw==").unwrap();
        assert_eq!(snap.mime, "image/png");
        assert_eq!(snap.data, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn rejects_non_data_urls() {
        assert_eq!(decode_data_url("https://example.org/a.png"), Err(SnapshotError::NotDataUrl));
        assert_eq!(decode_data_url("data:image/png,raw"), Err(SnapshotError::NotDataUrl));
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(SnapshotError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_resolves_through_one_shot_callback() {
        let transport = MemoryTransport::new();
        let mut w = Window::new(
            "w",
            "t",
            Arc::new(transport.clone()),
            Arc::new(MemorySink::new()),
            1000,
        );
        w.connect().unwrap();

        let rx = w.request_snapshot(Some([640, 480])).unwrap();
        let request = match &transport.messages()[0] {
            Message::Snapshot(r) => r.clone(),
            other => panic!("expected snapshot, got {other:?}"),
        };
        assert_eq!(request.size, Some([640, 480]));
        assert_eq!(w.callback_table().is_persistent(&request.callback.cbid), Some(false));

        w.route(Message::Callback(CallbackInvocation {
            cbid: request.callback.cbid.clone(),
            args: vec![json!("data:image/png;base64,iVBORw==")],
        }))
        .unwrap();

        let snap = rx.await.unwrap().unwrap();
        assert_eq!(snap.data.len(), 4);
        assert!(!w.callback_table().contains(&request.callback.cbid));
    }
}
