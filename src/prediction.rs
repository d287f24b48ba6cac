use crate::{
    db::{Database, DbError, NewPrediction, User},
    labels::label_for,
    model_provider::{ModelError, ModelProvider},
    preprocess::{preprocess, PreprocessError},
    uploads::{sanitize_filename, UploadError, UploadStore},
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("No image provided.")]
    NoImage,
    #[error("No image selected.")]
    NoFileSelected,
    #[error("Uploaded image is empty.")]
    EmptyImage,
    #[error("Invalid filename.")]
    InvalidFilename,
    #[error("Upload storage failed: {0}")]
    Upload(#[from] UploadError),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Model failed: {0}")]
    Model(#[from] ModelError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PredictionError {
    /// Problems with the request itself rather than with the service.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PredictionError::NoImage
                | PredictionError::NoFileSelected
                | PredictionError::EmptyImage
                | PredictionError::InvalidFilename
        )
    }
}

/// The `imagefile` part of a predict request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub prediction_id: i64,
    pub label: String,
    pub class_index: usize,
    pub confidence: f64,
    pub image_key: String,
}

/// Score in `[0, 1]` to a percentage with two decimals, clamped to `[0, 100]`.
pub fn confidence_percent(score: f32) -> f64 {
    let percent = ((score as f64) * 100.0 * 100.0).round() / 100.0;
    if percent.is_nan() {
        return 0.0;
    }
    percent.clamp(0.0, 100.0)
}

#[derive(Clone)]
pub struct PredictionService {
    model: Arc<dyn ModelProvider>,
    db: Database,
    uploads: UploadStore,
}

impl PredictionService {
    pub fn new(model: Arc<dyn ModelProvider>, db: Database, uploads: UploadStore) -> Self {
        Self { model, db, uploads }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_loaded()
    }

    /// Stores the upload, classifies it and records the outcome for `user`.
    ///
    /// Nothing is left behind on failure: the stored file is removed and no
    /// row is written.
    #[instrument(skip(self, upload, user), fields(user_id = user.id))]
    pub async fn predict(
        &self,
        upload: Option<UploadedImage>,
        user: &User,
    ) -> Result<PredictionResult, PredictionError> {
        let upload = upload.ok_or(PredictionError::NoImage)?;
        let original_name = match upload.filename.as_deref() {
            None | Some("") => return Err(PredictionError::NoFileSelected),
            Some(name) => name,
        };
        if upload.data.is_empty() {
            return Err(PredictionError::EmptyImage);
        }
        let sanitized = sanitize_filename(original_name);
        if sanitized.is_empty() {
            return Err(PredictionError::InvalidFilename);
        }

        let stored = self.uploads.save(&sanitized, &upload.data).await?;

        match self
            .classify_and_record(upload.data, &sanitized, &stored.key, user)
            .await
        {
            Ok(result) => {
                tracing::info!(
                    "Predicted {:?} ({:.2}%) for upload {}",
                    result.label,
                    result.confidence,
                    result.image_key
                );
                Ok(result)
            }
            Err(err) => {
                if let Err(e) = self.uploads.remove(&stored.key).await {
                    tracing::warn!("Failed to remove upload {}: {}", stored.key, e);
                }
                Err(err)
            }
        }
    }

    async fn classify_and_record(
        &self,
        data: Bytes,
        original_name: &str,
        image_key: &str,
        user: &User,
    ) -> Result<PredictionResult, PredictionError> {
        let model = self.model.clone();
        let classification = tokio::task::spawn_blocking(move || {
            let input = preprocess(&data)?;
            Ok::<_, PredictionError>(model.classify(&input)?)
        })
        .await??;

        let label = label_for(classification.class_index);
        let confidence = confidence_percent(classification.score);
        tracing::debug!(
            "Top class {} with score {:.4}",
            classification.class_index,
            classification.score
        );

        let row = self
            .db
            .insert_prediction(&NewPrediction {
                result: label.to_string(),
                confidence,
                image_name: image_key.to_string(),
                original_name: original_name.to_string(),
                timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
                user_id: user.id,
            })
            .await?;

        Ok(PredictionResult {
            prediction_id: row.id,
            label: row.result,
            class_index: classification.class_index,
            confidence: row.confidence,
            image_key: row.image_name,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::labels::{is_known_label, UNKNOWN_LABEL};
    use image::{DynamicImage, ImageBuffer, Rgb};
    use ndarray::{Array, Ix4};
    use std::io::Cursor;

    pub(crate) struct MockModelProvider {
        pub scores: Vec<f32>,
    }

    impl ModelProvider for MockModelProvider {
        fn infer(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ModelError> {
            assert_eq!(input.shape(), &[1, 32, 32, 3]);
            Ok(self.scores.clone())
        }

        fn is_loaded(&self) -> bool {
            true
        }
    }

    struct BrokenModelProvider;

    impl ModelProvider for BrokenModelProvider {
        fn infer(&self, _input: &Array<f32, Ix4>) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::InvalidOutput("broken".into()))
        }

        fn is_loaded(&self) -> bool {
            false
        }
    }

    /// One-hot style scores that put `score` on `class_index`.
    pub(crate) fn scores_for(class_index: usize, score: f32, len: usize) -> Vec<f32> {
        let rest = (1.0 - score) / (len as f32 - 1.0);
        (0..len)
            .map(|i| if i == class_index { score } else { rest })
            .collect()
    }

    pub(crate) fn png_bytes() -> Bytes {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(48, 48, Rgb([200, 20, 20]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::from(img)
            .write_to(&mut cursor, image::ImageFormat::Png)
            .unwrap();
        Bytes::from(cursor.into_inner())
    }

    fn upload(filename: &str, data: Bytes) -> Option<UploadedImage> {
        Some(UploadedImage {
            filename: Some(filename.to_string()),
            data,
        })
    }

    async fn service(
        model: impl ModelProvider,
    ) -> (PredictionService, Database, User, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().await.unwrap();
        let user = db.create_user("alice", "hash").await.unwrap();
        let uploads = UploadStore::new(dir.path()).await.unwrap();
        let service = PredictionService::new(Arc::new(model), db.clone(), uploads);
        (service, db, user, dir)
    }

    fn stored_files(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_confidence_percent() {
        assert_eq!(confidence_percent(0.9), 90.0);
        assert_eq!(confidence_percent(0.123456), 12.35);
        assert_eq!(confidence_percent(1.7), 100.0);
        assert_eq!(confidence_percent(-0.2), 0.0);
        assert_eq!(confidence_percent(f32::NAN), 0.0);
    }

    #[tokio::test]
    async fn test_stop_sign_prediction_is_recorded() {
        let model = MockModelProvider {
            scores: scores_for(14, 0.93, 43),
        };
        let (service, db, user, dir) = service(model).await;

        let result = service
            .predict(upload("stop sign.png", png_bytes()), &user)
            .await
            .unwrap();

        assert_eq!(result.label, "Stop");
        assert_eq!(result.class_index, 14);
        assert!(result.confidence > 0.0 && result.confidence <= 100.0);

        let rows = db.list_predictions_for_user(user.id, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, "Stop");
        assert_eq!(rows[0].confidence, result.confidence);
        assert_eq!(rows[0].user_id, user.id);
        assert_eq!(rows[0].original_name, "stop_sign.png");
        assert_eq!(rows[0].image_name, result.image_key);
        assert_eq!(stored_files(&dir), 1);
    }

    #[tokio::test]
    async fn test_unmapped_class_is_unknown() {
        let model = MockModelProvider {
            scores: scores_for(50, 0.8, 60),
        };
        let (service, _db, user, _dir) = service(model).await;

        let result = service
            .predict(upload("sign.png", png_bytes()), &user)
            .await
            .unwrap();

        assert_eq!(result.label, UNKNOWN_LABEL);
        assert!(is_known_label(&result.label));
    }

    #[tokio::test]
    async fn test_invalid_uploads_are_rejected() {
        let model = MockModelProvider {
            scores: scores_for(14, 0.93, 43),
        };
        let (service, db, user, dir) = service(model).await;

        let err = service.predict(None, &user).await.unwrap_err();
        assert!(matches!(err, PredictionError::NoImage));

        let err = service
            .predict(upload("", png_bytes()), &user)
            .await
            .unwrap_err();
        assert!(matches!(err, PredictionError::NoFileSelected));

        let err = service
            .predict(upload("sign.png", Bytes::new()), &user)
            .await
            .unwrap_err();
        assert!(matches!(err, PredictionError::EmptyImage));

        let err = service
            .predict(upload("../..", png_bytes()), &user)
            .await
            .unwrap_err();
        assert!(matches!(err, PredictionError::InvalidFilename));
        assert!(err.is_user_error());

        assert_eq!(db.count_predictions().await.unwrap(), 0);
        assert_eq!(stored_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_failures_leave_no_trace() {
        let (service, db, user, dir) = service(BrokenModelProvider).await;

        let err = service
            .predict(upload("sign.png", png_bytes()), &user)
            .await
            .unwrap_err();
        assert!(matches!(err, PredictionError::Model(_)));
        assert!(!err.is_user_error());

        let err = service
            .predict(upload("sign.png", Bytes::from_static(b"not an image")), &user)
            .await
            .unwrap_err();
        assert!(matches!(err, PredictionError::Preprocess(_)));

        assert_eq!(db.count_predictions().await.unwrap(), 0);
        assert_eq!(stored_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_same_filename_twice_keeps_both_images() {
        let model = MockModelProvider {
            scores: scores_for(13, 0.7, 43),
        };
        let (service, db, user, dir) = service(model).await;

        let first = service
            .predict(upload("sign.png", png_bytes()), &user)
            .await
            .unwrap();
        let second = service
            .predict(upload("sign.png", png_bytes()), &user)
            .await
            .unwrap();

        assert_ne!(first.image_key, second.image_key);
        assert_eq!(db.count_predictions_for_user(user.id).await.unwrap(), 2);
        assert_eq!(stored_files(&dir), 2);
    }
}
