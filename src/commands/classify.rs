//! Gated classification of leaf photos

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use colored::{ColoredString, Colorize};

use crate::config::Config;
use crate::error::{LeafscanError, Result};
use crate::inference::HttpInferenceClient;
use crate::pipeline::{describe_label, media, MediaFile, PredictionResult, UploadPipeline};
use crate::storage::{ScanRecord, ScanStore};

use super::{require_user, session_manager};

/// Counts from one `classify` run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassifySummary {
    /// Files that produced a classification
    pub succeeded: usize,
    /// Files that could not be read or classified
    pub failed: usize,
}

/// Validates the session, then classifies each file in order.
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `files` - Image files, processed one at a time
/// * `no_save` - Skip recording results in the scan store
///
/// # Errors
///
/// Fails when access is denied, or when any file could not be classified.
pub async fn run_classify(config: &Config, files: Vec<PathBuf>, no_save: bool) -> Result<()> {
    let sessions = session_manager(config)?;
    let user = require_user(&sessions).await?;
    tracing::info!("Classifying {} file(s) for {}", files.len(), user.email);

    let inference = HttpInferenceClient::new(&config.inference)?;
    let previews = media::minter_from_config(&config.pipeline)?;
    let mut pipeline = UploadPipeline::new(
        &config.pipeline,
        Arc::new(inference),
        sessions.handle(),
        previews,
    );

    let store = if no_save {
        None
    } else {
        Some(ScanStore::from_config(&config.storage)?)
    };

    let summary = classify_files(
        &mut pipeline,
        &files,
        store.as_ref().map(|s| (s, user.id.as_str())),
    )
    .await?;

    print_recent(&pipeline);
    if summary.failed > 0 {
        return Err(LeafscanError::Inference(format!(
            "{} of {} file(s) could not be classified",
            summary.failed,
            files.len()
        ))
        .into());
    }
    Ok(())
}

/// Pushes each file through `pipeline`, printing and optionally saving results.
///
/// Unreadable files are reported and skipped. Only successful
/// classifications are saved to `store`. A credential rejected by the
/// service ends the session and stops the run.
pub async fn classify_files(
    pipeline: &mut UploadPipeline,
    files: &[PathBuf],
    store: Option<(&ScanStore, &str)>,
) -> Result<ClassifySummary> {
    let mut summary = ClassifySummary::default();

    for path in files {
        let file = match MediaFile::from_path(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("{} {}: {:#}", "Skipped".yellow(), path.display(), e);
                summary.failed += 1;
                continue;
            }
        };
        let file_name = file.name().to_string();

        let result = match pipeline.classify(file).await.map(PredictionResult::clone) {
            Ok(result) => result,
            Err(e) => {
                if matches!(
                    e.downcast_ref::<LeafscanError>(),
                    Some(LeafscanError::SessionExpired(_))
                ) {
                    eprintln!(
                        "{} Run {} and try again.",
                        "Session expired.".red(),
                        "leafscan login --email <EMAIL>".cyan()
                    );
                }
                pipeline.clear();
                return Err(e);
            }
        };
        print_result(&file_name, pipeline.preview_uri(), &result);

        if result.is_sentinel() {
            summary.failed += 1;
            continue;
        }
        summary.succeeded += 1;

        if let Some((store, user_id)) = store {
            if let Err(e) = store.save_scan(&ScanRecord::new(user_id, &file_name, &result)) {
                tracing::warn!("Failed to save scan for {}: {:#}", file_name, e);
            }
        }
    }

    pipeline.clear();
    Ok(summary)
}

fn label_colored(result: &PredictionResult) -> ColoredString {
    match result.label() {
        _ if result.is_sentinel() => result.label().red().bold(),
        "Healthy" => result.label().green().bold(),
        other => other.yellow().bold(),
    }
}

fn print_result(file_name: &str, preview: Option<&str>, result: &PredictionResult) {
    println!();
    println!("{}", file_name.bold());
    if let Some(uri) = preview {
        println!("  {:<12} {}", "Preview:", uri.dimmed());
    }
    println!("  {:<12} {}", "Diagnosis:", label_colored(result));
    if !result.is_sentinel() {
        println!("  {:<12} {}%", "Confidence:", result.confidence_percent());
    }
    if let Some(description) = describe_label(result.label()) {
        println!("  {}", description);
    }
}

fn print_recent(pipeline: &UploadPipeline) {
    if pipeline.history().is_empty() {
        return;
    }
    let now = Utc::now();
    println!();
    println!("{}", "Recent scans:".bold());
    for entry in pipeline.history().iter() {
        println!(
            "  {:<14} {:>3}%  {}",
            entry.result.label(),
            entry.result.confidence_percent(),
            entry.age_label(now).dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::inference::InferenceClient;
    use crate::pipeline::media::InlineMinter;
    use crate::session::token_store::{MemoryTokenStore, StoredToken};
    use crate::session::{AuthClient, SessionManager, TokenGrant, TokenStore, User};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct FixedInference {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl InferenceClient for FixedInference {
        async fn classify(
            &self,
            file: &MediaFile,
            credential: Option<&str>,
        ) -> Result<PredictionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if file.name().starts_with("expired") && credential.is_some() {
                return Err(LeafscanError::SessionExpired("Invalid token".to_string()).into());
            }
            if file.name().starts_with("bad") {
                return Err(LeafscanError::Inference("status 500: boom".to_string()).into());
            }
            Ok(PredictionResult::new("Late Blight", 0.91)?)
        }
    }

    #[derive(Debug)]
    struct NoAuth;

    #[async_trait::async_trait]
    impl AuthClient for NoAuth {
        async fn login(&self, _: &str, _: &str) -> Result<TokenGrant> {
            unreachable!()
        }
        async fn signup(&self, _: &str, _: &str) -> Result<TokenGrant> {
            unreachable!()
        }
        async fn fetch_identity(&self, _: &str) -> Result<User> {
            unreachable!()
        }
    }

    fn write_png(dir: &TempDir, name: &str) -> PathBuf {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([0, 128, 0]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, out.into_inner()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_classify_files_saves_only_successes() {
        let dir = TempDir::new().unwrap();
        let good = write_png(&dir, "good.png");
        let bad = write_png(&dir, "bad.png");
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "not an image").unwrap();

        let sessions =
            SessionManager::new(Arc::new(NoAuth), Arc::new(MemoryTokenStore::default())).unwrap();
        let mut pipeline = UploadPipeline::new(
            &PipelineConfig::default(),
            Arc::new(FixedInference::default()),
            sessions.handle(),
            Arc::new(InlineMinter),
        );
        let store = ScanStore::new_with_path(dir.path().join("scans.db")).unwrap();

        let summary = classify_files(&mut pipeline, &[good, bad, text], Some((&store, "42")))
            .await
            .unwrap();

        assert_eq!(
            summary,
            ClassifySummary {
                succeeded: 1,
                failed: 2
            }
        );
        let saved = store.list_scans("42", 10).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].file_name, "good.png");
        assert_eq!(saved[0].label, "Late Blight");
        assert_eq!(pipeline.history().len(), 1);
        assert!(pipeline.preview_uri().is_none());
    }

    #[tokio::test]
    async fn test_classify_files_stops_when_session_rejected() {
        let dir = TempDir::new().unwrap();
        let expired = write_png(&dir, "expired.png");
        let next = write_png(&dir, "next.png");

        let store = Arc::new(MemoryTokenStore::with_token(StoredToken::bearer("stale")));
        let sessions = SessionManager::new(Arc::new(NoAuth), store.clone()).unwrap();
        let inference = Arc::new(FixedInference::default());
        let mut pipeline = UploadPipeline::new(
            &PipelineConfig::default(),
            inference.clone(),
            sessions.handle(),
            Arc::new(InlineMinter),
        );

        let err = classify_files(&mut pipeline, &[expired, next], None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LeafscanError>(),
            Some(LeafscanError::SessionExpired(_))
        ));
        assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
        assert!(!sessions.is_authenticated());
        assert!(store.load().unwrap().is_none());
    }
}
