use facemesh_core::imaging::decode_data_url;
use facemesh_core::{FaceMatch, FaceService, FeatureExtractor, Registration, ServiceError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Pending requests queued ahead of the engine thread.
const ENGINE_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("engine panicked while handling the request: {0}")]
    Panicked(String),
}

/// Messages sent from HTTP handlers to the engine thread.
///
/// Images travel still encoded so decoding happens off the async runtime.
enum EngineRequest {
    Register {
        image: String,
        name: String,
        reply: oneshot::Sender<Result<Registration, EngineError>>,
    },
    Recognize {
        image: String,
        reply: oneshot::Sender<Result<Vec<FaceMatch>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode `image`, extract faces and register the first under `name`.
    pub async fn register(&self, image: String, name: String) -> Result<Registration, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                image,
                name,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Decode `image`, extract faces and match each against the store.
    pub async fn recognize(&self, image: String) -> Result<Vec<FaceMatch>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the extractor (ONNX sessions need `&mut`) and runs
/// requests one at a time. A panic while handling one request is reported
/// to that caller and the thread keeps serving. It exits when every handle
/// is dropped.
pub fn spawn_engine<E>(mut extractor: E, service: Arc<FaceService>) -> Result<EngineHandle, EngineError>
where
    E: FeatureExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("facemesh-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { image, name, reply } => {
                        let result = guarded(|| {
                            decode_data_url(&image)
                                .map_err(ServiceError::from)
                                .and_then(|img| service.register(&mut extractor, &img, &name))
                        });
                        if let Err(err) = &result {
                            tracing::debug!(name = %name, error = %err, "register failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { image, reply } => {
                        let result = guarded(|| {
                            decode_data_url(&image)
                                .map_err(ServiceError::from)
                                .and_then(|img| service.recognize(&mut extractor, &img))
                        });
                        if let Err(err) = &result {
                            tracing::debug!(error = %err, "recognize failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// Run one request, turning a panic into [`EngineError::Panicked`].
fn guarded<T>(f: impl FnOnce() -> Result<T, ServiceError>) -> Result<T, EngineError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(EngineError::from),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            tracing::error!(panic = %msg, "engine request panicked");
            Err(EngineError::Panicked(msg))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facemesh_core::extractor::ExtractorError;
    use facemesh_core::imaging::encode_data_url;
    use facemesh_core::{DetectedFace, FaceBox, FaceStore, FeatureVector, Thresholds};
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    /// Reports one face whose features come from the top-left red value.
    struct RedExtractor;

    impl FeatureExtractor for RedExtractor {
        fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
            let red = image.get_pixel(0, 0)[0] as f32 / 255.0;
            Ok(vec![DetectedFace {
                bbox: FaceBox { x: 0, y: 0, width: image.width(), height: image.height() },
                features: FeatureVector::new(vec![red * 10.0, 0.0, 0.0]),
            }])
        }
    }

    fn png_url(red: u8) -> String {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([red, 0, 0]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        encode_data_url("image/png", &buf.into_inner())
    }

    fn engine(dir: &std::path::Path) -> EngineHandle {
        let store = Arc::new(FaceStore::open(dir).unwrap());
        let service = Arc::new(FaceService::new(store, Thresholds::default()));
        spawn_engine(RedExtractor, service).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_recognize_through_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = engine(tmp.path());

        let reg = handle.register(png_url(255), "red".into()).await.unwrap();
        assert_eq!(reg.name, "red");

        let matches = handle.recognize(png_url(255)).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name.as_deref(), Some("red"));
        assert_eq!(matches[0].bbox.width, 8);
    }

    #[tokio::test]
    async fn test_duplicate_surfaces_as_service_error() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = engine(tmp.path());

        handle.register(png_url(200), "a".into()).await.unwrap();
        let err = handle.register(png_url(200), "b".into()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Service(ServiceError::DuplicateFace { .. })
        ));
    }

    /// Panics on its first call, then behaves like [`RedExtractor`].
    struct FlakyExtractor {
        calls: usize,
    }

    impl FeatureExtractor for FlakyExtractor {
        fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractorError> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("model exploded");
            }
            RedExtractor.extract(image)
        }
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_engine_keeps_serving() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FaceStore::open(tmp.path()).unwrap());
        let service = Arc::new(FaceService::new(Arc::clone(&store), Thresholds::default()));
        let handle = spawn_engine(FlakyExtractor { calls: 0 }, service).unwrap();

        let err = handle.register(png_url(255), "red".into()).await.unwrap_err();
        match err {
            EngineError::Panicked(msg) => assert!(msg.contains("model exploded"), "{msg}"),
            other => panic!("expected panic report, got {other:?}"),
        }
        assert!(store.is_empty());

        let reg = handle.register(png_url(255), "red".into()).await.unwrap();
        assert_eq!(reg.name, "red");
        assert_eq!(store.names(), vec!["red"]);
    }

    #[tokio::test]
    async fn test_undecodable_image_is_invalid_input() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = engine(tmp.path());

        let err = handle.recognize("data:image/png;base64,AAAA".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Service(ServiceError::InvalidInput(_))));

        let err = handle.register(String::new(), "x".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Service(ServiceError::InvalidInput(_))));
    }
}
