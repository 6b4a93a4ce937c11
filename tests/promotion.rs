//! End-to-end promotion runs against in-memory registry and repository fakes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use hello_gitops::artifact::VersionLabel;
use hello_gitops::config::AppConfig;
use hello_gitops::credentials::{RegistryCredentials, Secret};
use hello_gitops::descriptor::DescriptorError;
use hello_gitops::error::{FailureKind, PromoteError};
use hello_gitops::manifest::{
    DescriptorRepository, FetchedDescriptor, ManifestError, ManifestUpdater, RepositoryError,
    ReviewHandle, ReviewRequest, UpdateOutcome,
};
use hello_gitops::pipeline::{Promotion, PushEvent, StepStatus};
use hello_gitops::artifact::ImageRef;
use hello_gitops::publish::{BuildRequest, ImageBuilder, PublishError, Publisher};

const CONFIG: &str = r#"
[image]
repository = "mateoclima/hello-app"

[manifest]
owner = "mateoclima"
repo = "hello-gitops-manifests"
"#;

const DESCRIPTOR: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: hello-app
  labels:
    app: hello-app
spec:
  replicas: 2
  selector:
    matchLabels:
      app: hello-app
  template:
    metadata:
      labels:
        app: hello-app
    spec:
      containers:
        - name: hello-app
          image: mateolima/hello-app:1759098837
          ports:
            - containerPort: 8000
";

const SHA: &str = "3f9a2c1d8e7b6a5f4c3d2e1f0a9b8c7d6e5f4a3b";

#[derive(Default)]
struct RecordingRegistry {
    fail_login: bool,
    fail_build: bool,
    logins: Mutex<Vec<String>>,
    pushed: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageBuilder for RecordingRegistry {
    async fn login(
        &self,
        _registry: Option<&str>,
        credentials: &RegistryCredentials,
    ) -> Result<(), PublishError> {
        if self.fail_login {
            return Err(PublishError::Auth(
                "unauthorized: incorrect username or password".to_string(),
            ));
        }
        self.logins.lock().unwrap().push(credentials.username.clone());
        Ok(())
    }

    async fn build_and_push(&self, request: &BuildRequest) -> Result<(), PublishError> {
        if self.fail_build {
            return Err(PublishError::Build(
                "failed to solve: process did not complete".to_string(),
            ));
        }
        self.pushed
            .lock()
            .unwrap()
            .extend(request.tags.iter().map(ToString::to_string));
        Ok(())
    }

    async fn exists(&self, image: &ImageRef) -> Result<bool, PublishError> {
        Ok(self.pushed.lock().unwrap().contains(&image.to_string()))
    }
}

/// Descriptor repository that keeps one open review per branch.
struct InMemoryRepository {
    content: String,
    reviews: Mutex<Vec<ReviewRequest>>,
}

impl InMemoryRepository {
    fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            reviews: Mutex::new(Vec::new()),
        }
    }

    fn reviews(&self) -> Vec<ReviewRequest> {
        self.reviews.lock().unwrap().clone()
    }
}

#[async_trait]
impl DescriptorRepository for InMemoryRepository {
    async fn fetch(
        &self,
        _path: &str,
        _branch: &str,
    ) -> Result<FetchedDescriptor, RepositoryError> {
        Ok(FetchedDescriptor {
            content: self.content.clone(),
            revision: "blob-1".to_string(),
        })
    }

    async fn open_review(&self, request: &ReviewRequest) -> Result<ReviewHandle, RepositoryError> {
        let mut reviews = self.reviews.lock().unwrap();
        if let Some(index) = reviews.iter().position(|r| r.branch == request.branch) {
            return Ok(ReviewHandle {
                number: index as u64 + 1,
                url: format!("https://example.test/pull/{}", index + 1),
                branch: request.branch.clone(),
                created: false,
                preview: None,
            });
        }
        reviews.push(request.clone());
        Ok(ReviewHandle {
            number: reviews.len() as u64,
            url: format!("https://example.test/pull/{}", reviews.len()),
            branch: request.branch.clone(),
            created: true,
            preview: None,
        })
    }
}

fn promotion(registry: Arc<RecordingRegistry>, repository: Arc<InMemoryRepository>) -> Promotion {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    let updater = ManifestUpdater::new(
        repository,
        config.image.repository.clone(),
        config.manifest.path.clone(),
        config.manifest.base_branch.clone(),
    );
    Promotion::new(config.trigger, Publisher::new(registry, config.image), updater)
}

fn credentials() -> RegistryCredentials {
    RegistryCredentials::new("mateoclima", Secret::new("dckr_pat_example"))
}

fn changed_lines(before: &str, after: &str) -> Vec<(String, String)> {
    assert_eq!(before.lines().count(), after.lines().count());
    before
        .lines()
        .zip(after.lines())
        .filter(|(a, b)| a != b)
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

#[tokio::test]
async fn test_push_to_main_publishes_and_proposes() {
    let registry = Arc::new(RecordingRegistry::default());
    let repository = Arc::new(InMemoryRepository::new(DESCRIPTOR));

    let report = promotion(registry.clone(), repository.clone())
        .run(&PushEvent::from_ref("refs/heads/main", SHA), &credentials())
        .await
        .unwrap();

    assert_eq!(report.publish.status, StepStatus::Succeeded);
    assert_eq!(report.manifest_update.status, StepStatus::Succeeded);
    assert!(report.failure.is_none());

    assert_eq!(
        *registry.pushed.lock().unwrap(),
        vec![
            format!("mateoclima/hello-app:{}", SHA),
            "mateoclima/hello-app:latest".to_string(),
        ]
    );

    let reviews = repository.reviews();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].title, format!("Update image to {}", SHA));
    assert_eq!(reviews[0].branch, format!("update-image-{}", SHA));
    assert_eq!(reviews[0].base_branch, "main");

    let changed = changed_lines(DESCRIPTOR, &reviews[0].content);
    assert_eq!(
        changed,
        vec![(
            "          image: mateolima/hello-app:1759098837".to_string(),
            format!("          image: mateoclima/hello-app:{}", SHA),
        )]
    );
    assert!(reviews[0].content.ends_with('\n'));

    match report.update.unwrap() {
        UpdateOutcome::Proposed { previous, image, review } => {
            assert_eq!(previous, "mateolima/hello-app:1759098837");
            assert_eq!(image.tag(), SHA);
            assert!(review.created);
        }
        other => panic!("expected a proposal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_failure_stops_before_manifest_update() {
    let registry = Arc::new(RecordingRegistry {
        fail_build: true,
        ..Default::default()
    });
    let repository = Arc::new(InMemoryRepository::new(DESCRIPTOR));

    let failed = promotion(registry.clone(), repository.clone())
        .run(&PushEvent::new("main", SHA), &credentials())
        .await
        .unwrap_err();

    assert_eq!(failed.error.kind(), FailureKind::Publish);
    assert_eq!(failed.report.publish.status, StepStatus::Failed);
    assert_eq!(failed.report.manifest_update.status, StepStatus::NotStarted);
    assert_eq!(failed.report.failure, Some(FailureKind::Publish));
    assert!(repository.reviews().is_empty());
}

#[tokio::test]
async fn test_auth_failure_builds_nothing() {
    let registry = Arc::new(RecordingRegistry {
        fail_login: true,
        ..Default::default()
    });
    let repository = Arc::new(InMemoryRepository::new(DESCRIPTOR));

    let failed = promotion(registry.clone(), repository.clone())
        .run(&PushEvent::new("main", SHA), &credentials())
        .await
        .unwrap_err();

    assert!(matches!(failed.error, PromoteError::Auth(_)));
    assert!(registry.pushed.lock().unwrap().is_empty());
    assert!(repository.reviews().is_empty());
    assert_eq!(failed.report.manifest_update.status, StepStatus::NotStarted);
}

#[tokio::test]
async fn test_rerun_for_same_push_reuses_review() {
    let registry = Arc::new(RecordingRegistry::default());
    let repository = Arc::new(InMemoryRepository::new(DESCRIPTOR));
    let promotion = promotion(registry.clone(), repository.clone());
    let event = PushEvent::new("main", SHA);

    let first = promotion.run(&event, &credentials()).await.unwrap();
    let second = promotion.run(&event, &credentials()).await.unwrap();

    assert_eq!(repository.reviews().len(), 1);
    match (first.update.unwrap(), second.update.unwrap()) {
        (
            UpdateOutcome::Proposed { review: a, .. },
            UpdateOutcome::Proposed { review: b, .. },
        ) => {
            assert_eq!(a.branch, b.branch);
            assert_eq!(a.number, b.number);
            assert!(a.created);
            assert!(!b.created);
        }
        other => panic!("expected two proposals, got {:?}", other),
    }
}

#[tokio::test]
async fn test_descriptor_already_current_opens_nothing() {
    let current = DESCRIPTOR.replace(
        "mateolima/hello-app:1759098837",
        &format!("mateoclima/hello-app:{}", SHA),
    );
    let repository = Arc::new(InMemoryRepository::new(&current));

    let report = promotion(Arc::new(RecordingRegistry::default()), repository.clone())
        .run(&PushEvent::new("main", SHA), &credentials())
        .await
        .unwrap();

    assert!(matches!(report.update, Some(UpdateOutcome::AlreadyCurrent { .. })));
    assert!(repository.reviews().is_empty());
}

#[tokio::test]
async fn test_push_to_other_branch_is_skipped() {
    let registry = Arc::new(RecordingRegistry::default());
    let repository = Arc::new(InMemoryRepository::new(DESCRIPTOR));

    let report = promotion(registry.clone(), repository.clone())
        .run(&PushEvent::from_ref("refs/heads/feature/login", SHA), &credentials())
        .await
        .unwrap();

    assert!(report.skipped());
    assert_eq!(report.manifest_update.status, StepStatus::Skipped);
    assert!(registry.logins.lock().unwrap().is_empty());
    assert!(repository.reviews().is_empty());
}

#[tokio::test]
async fn test_descriptor_without_image_fails_closed() {
    let descriptor = DESCRIPTOR.replace("          image: mateolima/hello-app:1759098837\n", "");
    let repository = Arc::new(InMemoryRepository::new(&descriptor));

    let failed = promotion(Arc::new(RecordingRegistry::default()), repository.clone())
        .run(&PushEvent::new("main", SHA), &credentials())
        .await
        .unwrap_err();

    assert_eq!(failed.error.kind(), FailureKind::ManifestUpdate);
    assert_eq!(failed.report.publish.status, StepStatus::Succeeded);
    assert_eq!(failed.report.manifest_update.status, StepStatus::Failed);
    assert!(matches!(
        failed.error,
        PromoteError::ManifestUpdate(ManifestError::Descriptor(DescriptorError::NoImage))
    ));
    assert!(repository.reviews().is_empty());
}

#[tokio::test]
async fn test_descriptor_with_two_images_fails_closed() {
    let descriptor = format!(
        "{}        - name: sidecar\n          image: busybox:1.36\n",
        DESCRIPTOR
    );
    let repository = Arc::new(InMemoryRepository::new(&descriptor));

    let failed = promotion(Arc::new(RecordingRegistry::default()), repository.clone())
        .run(&PushEvent::new("main", SHA), &credentials())
        .await
        .unwrap_err();

    assert!(matches!(
        failed.error,
        PromoteError::ManifestUpdate(ManifestError::Descriptor(DescriptorError::AmbiguousImage(2)))
    ));
    assert!(repository.reviews().is_empty());
}

#[tokio::test]
async fn test_distinct_pushes_get_distinct_labels() {
    let registry = Arc::new(RecordingRegistry::default());
    let repository = Arc::new(InMemoryRepository::new(DESCRIPTOR));
    let promotion = promotion(registry.clone(), repository.clone());

    let first = promotion
        .run(&PushEvent::new("main", "a1b2c3d4"), &credentials())
        .await
        .unwrap();
    let second = promotion
        .run(&PushEvent::new("main", "e5f6a7b8"), &credentials())
        .await
        .unwrap();

    assert_ne!(first.label, second.label);
    assert_eq!(first.label, Some(VersionLabel::new("a1b2c3d4").unwrap()));

    let reviews = repository.reviews();
    assert_eq!(reviews.len(), 2);
    assert_ne!(reviews[0].branch, reviews[1].branch);
}

#[tokio::test]
async fn test_invalid_revision_is_trigger_failure() {
    let registry = Arc::new(RecordingRegistry::default());
    let failed = promotion(registry.clone(), Arc::new(InMemoryRepository::new(DESCRIPTOR)))
        .run(&PushEvent::new("main", "not a sha"), &credentials())
        .await
        .unwrap_err();

    assert_eq!(failed.error.kind(), FailureKind::Trigger);
    assert_eq!(failed.report.publish.status, StepStatus::NotStarted);
    assert!(registry.logins.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_manifest_update_alone_needs_published_image() {
    let registry = Arc::new(RecordingRegistry::default());
    let repository = Arc::new(InMemoryRepository::new(DESCRIPTOR));

    let err = promotion(registry.clone(), repository.clone())
        .update_published(SHA)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Publish);
    assert!(matches!(err, PromoteError::Publish(PublishError::NotPublished(_))));
    assert!(repository.reviews().is_empty());
}

#[tokio::test]
async fn test_manifest_update_alone_after_publish() {
    let registry = Arc::new(RecordingRegistry::default());
    let repository = Arc::new(InMemoryRepository::new(DESCRIPTOR));
    let promotion = promotion(registry.clone(), repository.clone());

    Publisher::new(registry.clone(), AppConfig::from_toml(CONFIG).unwrap().image)
        .publish(&VersionLabel::new(SHA).unwrap(), &credentials())
        .await
        .unwrap();

    let outcome = promotion.update_published(SHA).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::Proposed { .. }));
    assert_eq!(repository.reviews().len(), 1);
    assert_eq!(repository.reviews()[0].title, format!("Update image to {}", SHA));
}
