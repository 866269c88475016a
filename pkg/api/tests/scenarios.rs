use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use pkg_api::server::router;
use pkg_api::{AppState, token::TokenIssuer};
use pkg_cluster::MockGateway;
use pkg_constants::auth::RESERVED_ADMIN_USERNAME;
use pkg_controllers::{Engine, EngineConfig, ManifestArchive};
use pkg_state::{NoopAuditSink, Repos};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const ADMIN_PASSWORD: &str = "admin-password";

const BUNDLE: &str = r#"apiVersion: v1
kind: Pod
metadata:
  name: web
spec:
  containers:
    - name: web
      image: nginx:1.27
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  owner: "{{username}}"
"#;

const RENAMED: &str = r#"apiVersion: v1
kind: Pod
metadata:
  name: web-v2
spec:
  containers:
    - name: web
      image: nginx:1.27
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  owner: "{{username}}"
"#;

struct TestServer {
    app: Router,
    mock: Arc<MockGateway>,
}

impl TestServer {
    async fn start() -> Self {
        let mock = Arc::new(MockGateway::new());
        let engine = Engine::new(
            Repos::in_memory(),
            mock.clone(),
            ManifestArchive::in_memory(),
            Arc::new(NoopAuditSink),
            EngineConfig::default(),
        );
        engine.accounts.bootstrap_admin(ADMIN_PASSWORD).await.unwrap();
        let tokens = TokenIssuer::new("test-secret", "platform", 1);
        Self {
            app: router(AppState::new(engine, tokens)),
            mock,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(&self, username: &str, password: &str) -> u64 {
        let (status, body) = self
            .call(
                Method::POST,
                "/register",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_u64().unwrap()
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn admin_token(&self) -> String {
        self.login(RESERVED_ADMIN_USERNAME, ADMIN_PASSWORD).await
    }

    /// Admin creates `group_name` and makes `user_id` a manager of it.
    async fn group_with_manager(&self, group_name: &str, user_id: u64) -> u64 {
        let admin = self.admin_token().await;
        let (status, group) = self
            .call(
                Method::POST,
                "/groups",
                Some(&admin),
                Some(json!({ "group_name": group_name })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{group}");
        let g_id = group["id"].as_u64().unwrap();
        let (status, body) = self
            .call(
                Method::POST,
                "/user-group",
                Some(&admin),
                Some(json!({ "u_id": user_id, "g_id": g_id, "role": "manager" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        g_id
    }
}

#[tokio::test]
async fn register_login_and_list_users() {
    let server = TestServer::start().await;
    server.register("alice", "123456").await;
    let token = server.login("alice", "123456").await;

    let (status, users) = server.call(Method::GET, "/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = users
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|u| u["username"].as_str())
        .collect();
    assert!(names.contains(&"alice"));
    assert!(users[0].get("password_hash").is_none());
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let server = TestServer::start().await;
    let (status, body) = server.call(Method::GET, "/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = server
        .call(Method::GET, "/users", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server
        .call(
            Method::POST,
            "/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = server.call(Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn admin_creates_group_and_adds_manager() {
    let server = TestServer::start().await;
    let alice = server.register("alice", "123456").await;
    assert_eq!(alice, 2);
    let g_id = server.group_with_manager("project_team", alice).await;

    let token = server.login("alice", "123456").await;
    let (status, memberships) = server
        .call(
            Method::GET,
            &format!("/user-group/by-user?u_id={}", alice),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let groups = memberships["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["g_id"].as_u64(), Some(g_id));
    assert_eq!(groups[0]["group_name"], "project_team");
    assert_eq!(groups[0]["role"], "manager");
}

#[tokio::test]
async fn non_admins_cannot_manage_groups() {
    let server = TestServer::start().await;
    server.register("alice", "123456").await;
    let token = server.login("alice", "123456").await;

    let (status, _) = server
        .call(
            Method::POST,
            "/groups",
            Some(&token),
            Some(json!({ "group_name": "rogue" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = server.admin_token().await;
    let (status, body) = server
        .call(
            Method::POST,
            "/groups",
            Some(&admin),
            Some(json!({ "group_name": "super" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
async fn only_group_managers_modify_projects() {
    let server = TestServer::start().await;
    let alice = server.register("alice", "123456").await;
    server.register("bob", "654321").await;
    let g_id = server.group_with_manager("project_team", alice).await;
    let alice_token = server.login("alice", "123456").await;
    let bob_token = server.login("bob", "654321").await;

    let (status, project) = server
        .call(
            Method::POST,
            "/projects",
            Some(&alice_token),
            Some(json!({ "project_name": "user_project", "g_id": g_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{project}");
    let p_id = project["id"].as_u64().unwrap();

    let (status, _) = server
        .call(
            Method::PUT,
            &format!("/projects/{}", p_id),
            Some(&bob_token),
            Some(json!({ "description": "hijacked" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server
        .call(
            Method::DELETE,
            &format!("/projects/{}", p_id),
            Some(&alice_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "project deleted");

    let (status, _) = server
        .call(
            Method::GET,
            &format!("/projects/{}", p_id),
            Some(&alice_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn config_file_create_update_and_instantiate() {
    let server = TestServer::start().await;
    let alice = server.register("alice", "123456").await;
    let g_id = server.group_with_manager("project_team", alice).await;
    let token = server.login("alice", "123456").await;

    let (status, project) = server
        .call(
            Method::POST,
            "/projects",
            Some(&token),
            Some(json!({ "project_name": "user_project", "g_id": g_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{project}");
    let p_id = project["id"].as_u64().unwrap();
    let ns = format!("proj-{}-alice", p_id);

    let (status, created) = server
        .call(
            Method::POST,
            "/config-files",
            Some(&token),
            Some(json!({ "project_id": p_id, "filename": "app.yaml", "raw_yaml": BUNDLE })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["resources"].as_array().unwrap().len(), 2);
    let cf = created["id"].as_u64().unwrap();

    let (status, body) = server
        .call(Method::POST, &format!("/instance/{}", cf), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["namespace"], json!(ns));
    assert_eq!(server.mock.names_of(&ns, "Pod").await, vec!["web"]);
    assert_eq!(server.mock.names_of(&ns, "ConfigMap").await, vec!["settings"]);
    let cm = server.mock.object(&ns, "ConfigMap", "settings").await.unwrap();
    assert_eq!(cm["data"]["owner"], "alice");

    let (status, updated) = server
        .call(
            Method::PUT,
            &format!("/config-files/{}", cf),
            Some(&token),
            Some(json!({ "raw_yaml": RENAMED })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert!(server.mock.names_of(&ns, "Pod").await.is_empty());

    let (status, _) = server
        .call(Method::POST, &format!("/instance/{}", cf), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(server.mock.names_of(&ns, "Pod").await, vec!["web-v2"]);

    let (status, resources) = server
        .call(
            Method::GET,
            &format!("/config-files/{}/resources", cf),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<&str> = resources
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    names.sort();
    assert_eq!(names, vec!["settings", "web-v2"]);
}

#[tokio::test]
async fn outsiders_cannot_read_config_files() {
    let server = TestServer::start().await;
    let alice = server.register("alice", "123456").await;
    server.register("mallory", "123456").await;
    let g_id = server.group_with_manager("project_team", alice).await;
    let alice_token = server.login("alice", "123456").await;
    let mallory_token = server.login("mallory", "123456").await;

    let (_, project) = server
        .call(
            Method::POST,
            "/projects",
            Some(&alice_token),
            Some(json!({ "project_name": "user_project", "g_id": g_id })),
        )
        .await;
    let p_id = project["id"].as_u64().unwrap();

    let (status, _) = server
        .call(
            Method::POST,
            "/config-files",
            Some(&mallory_token),
            Some(json!({ "project_id": p_id, "filename": "x.yaml", "raw_yaml": BUNDLE })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, created) = server
        .call(
            Method::POST,
            "/config-files",
            Some(&alice_token),
            Some(json!({ "project_id": p_id, "filename": "app.yaml", "raw_yaml": BUNDLE })),
        )
        .await;
    let cf = created["id"].as_u64().unwrap();
    let (status, _) = server
        .call(
            Method::GET,
            &format!("/config-files/{}", cf),
            Some(&mallory_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn plain_members_cannot_change_config_files() {
    let server = TestServer::start().await;
    let alice = server.register("alice", "123456").await;
    let bob = server.register("bob", "123456").await;
    let g_id = server.group_with_manager("project_team", alice).await;
    let admin = server.admin_token().await;
    let (status, body) = server
        .call(
            Method::POST,
            "/user-group",
            Some(&admin),
            Some(json!({ "u_id": bob, "g_id": g_id, "role": "user" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let alice_token = server.login("alice", "123456").await;
    let bob_token = server.login("bob", "123456").await;

    let (_, project) = server
        .call(
            Method::POST,
            "/projects",
            Some(&alice_token),
            Some(json!({ "project_name": "user_project", "g_id": g_id })),
        )
        .await;
    let p_id = project["id"].as_u64().unwrap();
    let alice_ns = format!("proj-{}-alice", p_id);

    let (status, _) = server
        .call(
            Method::POST,
            "/config-files",
            Some(&bob_token),
            Some(json!({ "project_id": p_id, "filename": "x.yaml", "raw_yaml": BUNDLE })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = server
        .call(
            Method::POST,
            "/config-files",
            Some(&alice_token),
            Some(json!({ "project_id": p_id, "filename": "app.yaml", "raw_yaml": BUNDLE })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let cf = created["id"].as_u64().unwrap();
    let (status, _) = server
        .call(Method::POST, &format!("/instance/{}", cf), Some(&alice_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .call(
            Method::PUT,
            &format!("/config-files/{}", cf),
            Some(&bob_token),
            Some(json!({ "raw_yaml": RENAMED })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = server
        .call(
            Method::DELETE,
            &format!("/config-files/{}", cf),
            Some(&bob_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(server.mock.names_of(&alice_ns, "Pod").await, vec!["web"]);

    // Plain members still read and instantiate.
    let (status, body) = server
        .call(
            Method::GET,
            &format!("/config-files/{}", cf),
            Some(&bob_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["raw_text"], json!(BUNDLE));
    let (status, body) = server
        .call(Method::POST, &format!("/instance/{}", cf), Some(&bob_token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["namespace"], json!(format!("proj-{}-bob", p_id)));
}
