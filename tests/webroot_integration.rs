use content_repo::logic::{AccessList, ContentRepository, PermissionChecker, WebRootRequest};
use content_repo::model::{ContainerType, FieldMap, UserContext};
use content_repo::seed::{load_demo_content, DemoContent, DEMO_PROJECT};
use content_repo::store::InMemoryStore;
use content_repo::ContentError;
use serde_json::json;
use std::sync::Arc;

// Repository over a fresh in-memory store holding the demo content
struct TestRepo {
    repository: Arc<ContentRepository<InMemoryStore>>,
    acl: Arc<AccessList>,
    demo: DemoContent,
}

impl TestRepo {
    async fn new() -> Self {
        let acl = Arc::new(AccessList::new());
        let permissions: Arc<dyn PermissionChecker> = acl.clone();
        let repository = ContentRepository::builder(Arc::new(InMemoryStore::new()))
            .permissions(permissions)
            .build();
        let demo = load_demo_content(&repository).await.expect("demo content");
        Self {
            repository: Arc::new(repository),
            acl,
            demo,
        }
    }

    fn request(&self, path: &str) -> WebRootRequest {
        WebRootRequest::new(DEMO_PROJECT, path).with_languages(["en", "de"])
    }

    async fn edit(&self, node_id: &String, language: &str, release: Option<&str>, fields: serde_json::Value) {
        let fields: FieldMap = serde_json::from_value(fields).unwrap();
        let user = UserContext::system();
        let content = &self.repository.content;
        content.save_draft(node_id, language, release, fields, &user).await.unwrap();
        content.publish(node_id, language, release, &user).await.unwrap();
    }
}

#[tokio::test]
async fn test_resolve_folder_and_content() {
    let repo = TestRepo::new().await;

    let folder = repo.repository.resolve_path(&repo.request("/News/2015")).await.unwrap();
    assert_eq!(folder.node.id, repo.demo.news_2015_folder_id);
    assert_eq!(folder.language.as_deref(), Some("en"));
    assert!(!folder.download);

    let content = repo
        .repository
        .resolve_path(&repo.request("//News/2015//News_2015.en.html/"))
        .await
        .unwrap();
    assert_eq!(content.node.id, repo.demo.news_2015_id);
    assert_eq!(content.path, "News/2015/News_2015.en.html");
    let container = content.container.expect("container");
    assert_eq!(container.language, "en");
    assert_eq!(container.fields.get("title"), Some(&json!("News 2015")));
    assert_eq!(container.version.to_string(), "1.0");
}

#[tokio::test]
async fn test_language_preference_decides_between_matching_languages() {
    let repo = TestRepo::new().await;
    // the german translation now shares the english file name
    repo.edit(
        &repo.demo.news_2015_id,
        "de",
        None,
        json!({"filename": "News_2015.en.html", "title": "Neuigkeiten 2015"}),
    )
    .await;

    let path = "/News/2015/News_2015.en.html";
    let english = repo.repository.resolve_path(&repo.request(path)).await.unwrap();
    assert_eq!(english.language.as_deref(), Some("en"));

    let german = repo
        .repository
        .resolve_path(&WebRootRequest::new(DEMO_PROJECT, path).with_languages(["de", "en"]))
        .await
        .unwrap();
    assert_eq!(german.language.as_deref(), Some("de"));
    assert_eq!(german.node.id, english.node.id);
}

#[tokio::test]
async fn test_each_segment_matches_in_its_own_language() {
    let repo = TestRepo::new().await;

    let mixed = repo
        .repository
        .resolve_path(&WebRootRequest::new(DEMO_PROJECT, "/Neuigkeiten/2015/News_2015.en.html").with_languages(["en"]))
        .await
        .unwrap();
    assert_eq!(mixed.node.id, repo.demo.news_2015_id);
    assert_eq!(mixed.language.as_deref(), Some("en"));

    let german = repo
        .repository
        .resolve_path(&WebRootRequest::new(DEMO_PROJECT, "/News/2015/News_2015.de.html").with_languages(["en"]))
        .await
        .unwrap();
    assert_eq!(german.language.as_deref(), Some("de"));
}

#[tokio::test]
async fn test_non_preferred_languages_fall_back_to_smallest_tag() {
    let repo = TestRepo::new().await;
    let user = UserContext::system();
    let gadgets = repo
        .repository
        .content
        .create_node(&repo.demo.project_id, &repo.demo.products_id, &repo.demo.folder_schema_id, &user)
        .await
        .unwrap();
    repo.edit(&gadgets.id, "fr", None, json!({"name": "Gadgets"})).await;
    repo.edit(&gadgets.id, "de", None, json!({"name": "Gadgets"})).await;

    let resolved = repo
        .repository
        .resolve_path(&WebRootRequest::new(DEMO_PROJECT, "/Products/Gadgets").with_languages(["en"]))
        .await
        .unwrap();
    assert_eq!(resolved.node.id, gadgets.id);
    assert_eq!(resolved.language.as_deref(), Some("de"));
}

#[tokio::test]
async fn test_binary_content_is_flagged_for_download() {
    let repo = TestRepo::new().await;
    let resolved = repo
        .repository
        .resolve_path(&repo.request("/News/2015/somefile.dat"))
        .await
        .unwrap();
    assert_eq!(resolved.node.id, repo.demo.binary_id);
    assert!(resolved.download);
}

#[tokio::test]
async fn test_empty_path_resolves_root() {
    let repo = TestRepo::new().await;
    for path in ["", "/", "///"] {
        let resolved = repo.repository.resolve_path(&repo.request(path)).await.unwrap();
        assert_eq!(resolved.node.id, repo.demo.root_id);
        // the root only has an unpublished draft
        assert!(resolved.container.is_none());
    }

    let draft = repo
        .repository
        .resolve_path(&repo.request("/").with_mode(ContainerType::Draft))
        .await
        .unwrap();
    assert_eq!(draft.language.as_deref(), Some("en"));
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let repo = TestRepo::new().await;
    let result = repo.repository.resolve_path(&repo.request("/News/2015/no-valid-content.html")).await;
    match result {
        Err(ContentError::NotFound { path }) => assert_eq!(path, "/News/2015/no-valid-content.html"),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_taken_offline_node_still_resolves_as_draft() {
    let repo = TestRepo::new().await;
    let path = "/News/2015/News_2015.en.html";
    let before = repo
        .repository
        .resolve_path(&repo.request(path).with_mode(ContainerType::Draft))
        .await
        .unwrap();

    let taken = repo
        .repository
        .content
        .take_offline(&repo.demo.news_2015_id, None, None, &UserContext::system())
        .await
        .unwrap();
    assert_eq!(taken, 2);

    assert!(matches!(
        repo.repository.resolve_path(&repo.request(path)).await,
        Err(ContentError::NotFound { .. })
    ));
    let after = repo
        .repository
        .resolve_path(&repo.request(path).with_mode(ContainerType::Draft))
        .await
        .unwrap();
    assert_eq!(after.node.id, before.node.id);
    assert_eq!(after.container, before.container);
}

#[tokio::test]
async fn test_releases_are_isolated() {
    let repo = TestRepo::new().await;
    let initial = repo.demo.release_id.clone();
    let summer = repo
        .repository
        .content
        .create_release(&repo.demo.project_id, "summer", &UserContext::system())
        .await
        .unwrap();

    for path in ["/News", "/News/2015", "/News/2015/News_2015.en.html", "/Products"] {
        let old = repo.repository.resolve_path(&repo.request(path).with_release(initial.clone())).await.unwrap();
        let new = repo.repository.resolve_path(&repo.request(path).with_release(summer.id.clone())).await.unwrap();
        assert_eq!(old.node, new.node);
        assert_eq!(old.container, new.container);
    }

    repo.edit(&repo.demo.news_2015_folder_id, "en", Some(summer.id.as_str()), json!({"name": "2015_new"}))
        .await;

    let english_only = |release: &str, path: &str| {
        WebRootRequest::new(DEMO_PROJECT, path)
            .with_release(release)
            .with_languages(["en"])
    };
    let old = repo.repository.resolve_path(&english_only(initial.as_str(), "/News/2015")).await.unwrap();
    assert_eq!(old.language.as_deref(), Some("en"));
    let renamed = repo.repository.resolve_path(&english_only(summer.id.as_str(), "/News/2015_new")).await.unwrap();
    assert_eq!(renamed.node.id, repo.demo.news_2015_folder_id);
    // the german name still matches in the new release
    let fallback = repo.repository.resolve_path(&english_only(summer.id.as_str(), "/News/2015")).await.unwrap();
    assert_eq!(fallback.language.as_deref(), Some("de"));
    assert!(matches!(
        repo.repository.resolve_path(&english_only(initial.as_str(), "/News/2015_new")).await,
        Err(ContentError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_forbidden_hides_deeper_structure() {
    let repo = TestRepo::new().await;
    repo.acl.revoke_read("alice", &repo.demo.news_id);
    let alice = UserContext::new("alice".to_string());

    for path in ["/News/2015/News_2015.en.html", "/News/does-not-exist", "/News"] {
        match repo.repository.resolve_path(&repo.request(path).as_user(alice.clone())).await {
            Err(ContentError::Forbidden { node_id }) => assert_eq!(node_id, repo.demo.news_id),
            other => panic!("expected Forbidden for {}, got {:?}", path, other),
        }
    }

    assert!(repo.repository.resolve_path(&repo.request("/Products").as_user(alice)).await.is_ok());
    assert!(repo
        .repository
        .resolve_path(&repo.request("/News").as_user(UserContext::system()))
        .await
        .is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolutions_agree() {
    let repo = TestRepo::new().await;
    let request = repo.request("/News/2015/News_2015.en.html");

    let mut handles = Vec::new();
    for _ in 0..32 {
        let repository = repo.repository.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move {
            let resolved = repository.resolve_path(&request).await.unwrap();
            serde_json::to_string(&resolved).unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}
