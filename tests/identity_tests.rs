use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use u4i::api::AppState;
use u4i::config::Config;

async fn spawn_app() -> (Router, Arc<AppState>) {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    // A single pooled connection keeps every request on the same
    // in-memory database.
    config.general.max_db_connections = 1;
    config.general.min_db_connections = 1;
    config.server.secure_cookies = false;

    let state = u4i::api::create_app_state_from_config(config, None)
        .await
        .expect("Failed to create app state");
    let app = u4i::api::router(state.clone()).await;
    (app, state)
}

fn session_cookie(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("expected a session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn form_request(uri: &str, cookie: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

/// GET a form route, returning the session cookie and minted CSRF token.
async fn open_form(app: &Router, uri: &str) -> (String, String) {
    let response = app.clone().oneshot(get_request(uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = session_cookie(&response);
    let json = body_json(response).await;
    let csrf = json["data"]["csrf_token"].as_str().unwrap().to_string();
    (cookie, csrf)
}

/// Register a user through the HTTP surface; returns the session cookie.
async fn register_user(app: &Router, username: &str, email: &str, password: &str) -> String {
    let (cookie, csrf) = open_form(app, "/register").await;

    let body = format!(
        "username={username}&email={email}&confirm_email={email}&password={password}&confirm_password={password}&csrf_token={csrf}"
    );
    let response = app
        .clone()
        .oneshot(form_request("/register", Some(&cookie), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    cookie
}

/// Register and redeem the validation token, leaving the user validated.
async fn register_validated_user(
    app: &Router,
    state: &AppState,
    username: &str,
    email: &str,
    password: &str,
) -> i32 {
    let cookie = register_user(app, username, email, password).await;

    let user = state
        .store
        .find_user_by_username(username)
        .await
        .unwrap()
        .unwrap();
    let row = state
        .store
        .get_email_validation(user.id)
        .await
        .unwrap()
        .unwrap();

    let response = app
        .clone()
        .oneshot(get_request(
            &format!("/validate/{}", row.validation_token),
            Some(&cookie),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    user.id
}

#[tokio::test]
async fn test_register_and_validate_happy_path() {
    let (app, state) = spawn_app().await;

    let (cookie, csrf) = open_form(&app, "/register").await;

    let body = format!(
        "username=FakeUserName1234&email=FakeUserName123@email.com&confirm_email=FakeUserName123@email.com&password=FakePassword1234&confirm_password=FakePassword1234&csrf_token={csrf}"
    );
    let response = app
        .clone()
        .oneshot(form_request("/register", Some(&cookie), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["message"], "Validate Your Email!");

    let user = state
        .store
        .find_user_by_username("FakeUserName1234")
        .await
        .unwrap()
        .expect("user should exist");
    assert_eq!(user.email, "fakeusername123@email.com");
    assert!(!state.store.is_email_validated(user.id).await.unwrap());

    // Send the validation email.
    let response = app
        .clone()
        .oneshot(form_request(
            "/send-validation-email",
            Some(&cookie),
            format!("csrf_token={csrf}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["message"], "Email sent!");

    let row = state
        .store
        .get_email_validation(user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.attempts, 1);

    // Redeem the stored token.
    let response = app
        .clone()
        .oneshot(get_request(
            &format!("/validate/{}", row.validation_token),
            Some(&cookie),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/home");

    assert!(state.store.is_email_validated(user.id).await.unwrap());
    assert!(
        state
            .store
            .get_email_validation(user.id)
            .await
            .unwrap()
            .is_none()
    );

    // The gate now lets the session through.
    let response = app
        .clone()
        .oneshot(get_request("/home", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Presenting the same token twice is a 404.
    let response = app
        .clone()
        .oneshot(get_request(
            &format!("/validate/{}", row.validation_token),
            Some(&cookie),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_registration_with_unvalidated_email() {
    let (app, _state) = spawn_app().await;

    register_user(
        &app,
        "FakeUserName1234",
        "FakeUserName123@email.com",
        "FakePassword1234",
    )
    .await;

    // Fresh session, same email, otherwise valid form.
    let (cookie, csrf) = open_form(&app, "/register").await;
    let body = format!(
        "username=OtherUserName999&email=FakeUserName123@email.com&confirm_email=FakeUserName123@email.com&password=FakePassword1234&confirm_password=FakePassword1234&csrf_token={csrf}"
    );
    let response = app
        .clone()
        .oneshot(form_request("/register", Some(&cookie), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "failure");
    assert_eq!(
        json["message"],
        "An account already exists with that information but the email has not been validated."
    );
    assert_eq!(json["error_code"], 1);
    assert!(json.get("errors").is_none());

    // The session now belongs to the unvalidated account.
    let response = app
        .clone()
        .oneshot(get_request("/confirm-email", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Same email alongside another error: the unvalidated hint is stripped.
    let body = format!(
        "username=&email=FakeUserName123@email.com&confirm_email=FakeUserName123@email.com&password=FakePassword1234&confirm_password=FakePassword1234&csrf_token={csrf}"
    );
    let response = app
        .clone()
        .oneshot(form_request("/register", Some(&cookie), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Unable to register with that information.");
    assert!(json["errors"]["username"].is_array());
    assert!(json["errors"].get("email").is_none());
}

#[tokio::test]
async fn test_login_wrong_then_correct_password() {
    let (app, state) = spawn_app().await;

    register_validated_user(
        &app,
        &state,
        "FakeUserName1234",
        "FakeUserName123@email.com",
        "FakePassword1234",
    )
    .await;

    let (cookie, csrf) = open_form(&app, "/login").await;

    let body = format!("username=FakeUserName1234&password=A&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/login", Some(&cookie), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Unable to login with that information.");
    assert_eq!(json["errors"]["password"][0], "Invalid password.");

    let body = format!("username=FakeUserName1234&password=FakePassword1234&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/login", Some(&cookie), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["redirect_url"], "/home");
}

#[tokio::test]
async fn test_login_unknown_user() {
    let (app, _state) = spawn_app().await;

    let (cookie, csrf) = open_form(&app, "/login").await;
    let body = format!("username=NoSuchUser&password=whatever12345&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/login", Some(&cookie), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["errors"]["username"][0], "That user does not exist.");
}

#[tokio::test]
async fn test_login_unvalidated_user_gets_bound_session() {
    let (app, _state) = spawn_app().await;

    register_user(
        &app,
        "FakeUserName1234",
        "FakeUserName123@email.com",
        "FakePassword1234",
    )
    .await;

    let (cookie, csrf) = open_form(&app, "/login").await;
    let body = format!("username=FakeUserName1234&password=FakePassword1234&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/login", Some(&cookie), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], 1);

    // The session is bound anyway so the resend flow works.
    let response = app
        .clone()
        .oneshot(form_request(
            "/send-validation-email",
            Some(&cookie),
            format!("csrf_token={csrf}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_validation_email_rate_limit_within_minute() {
    let (app, _state) = spawn_app().await;

    let cookie = register_user(
        &app,
        "FakeUserName1234",
        "FakeUserName123@email.com",
        "FakePassword1234",
    )
    .await;

    // csrf was minted on the register form; it is still the session token.
    let response = app
        .clone()
        .oneshot(get_request("/confirm-email", Some(&cookie)))
        .await
        .unwrap();
    let json = body_json(response).await;
    let csrf = json["data"]["csrf_token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(form_request(
            "/send-validation-email",
            Some(&cookie),
            format!("csrf_token={csrf}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(form_request(
            "/send-validation-email",
            Some(&cookie),
            format!("csrf_token={csrf}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = body_json(response).await;
    assert_eq!(json["error_code"], 3);
    assert_eq!(
        json["message"],
        "4 attempts left. Please wait 1 minute before sending another email."
    );
}

#[tokio::test]
async fn test_forgot_password_neutrality() {
    let (app, state) = spawn_app().await;

    // Unknown email: neutral response, no row anywhere.
    let (cookie, csrf) = open_form(&app, "/forgot-password").await;
    let body = format!("email=does-not-exist@example.com&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/forgot-password", Some(&cookie), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "If you entered a valid email, you should receive a reset password link soon."
    );

    // Unvalidated account: same neutral response, no row created.
    register_user(
        &app,
        "UnvalidatedUser1",
        "unvalidated@email.com",
        "FakePassword1234",
    )
    .await;
    let unvalidated = state
        .store
        .find_user_by_username("UnvalidatedUser1")
        .await
        .unwrap()
        .unwrap();

    let body = format!("email=unvalidated@email.com&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/forgot-password", Some(&cookie), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "If you entered a valid email, you should receive a reset password link soon."
    );
    assert!(
        state
            .store
            .get_forgot_password(unvalidated.id)
            .await
            .unwrap()
            .is_none()
    );

    // Validated account: still neutral, but a row with one counted attempt.
    let user_id = register_validated_user(
        &app,
        &state,
        "ValidatedUser1",
        "validated@email.com",
        "FakePassword1234",
    )
    .await;

    let body = format!("email=validated@email.com&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/forgot-password", Some(&cookie), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["message"],
        "If you entered a valid email, you should receive a reset password link soon."
    );

    let row = state
        .store
        .get_forgot_password(user_id)
        .await
        .unwrap()
        .expect("reset row should exist");
    assert_eq!(row.attempts, 1);
}

#[tokio::test]
async fn test_forgot_password_invalid_email_shape() {
    let (app, _state) = spawn_app().await;

    let (cookie, csrf) = open_form(&app, "/forgot-password").await;
    let body = format!("email=not-an-email&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/forgot-password", Some(&cookie), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Email is not valid.");
    assert_eq!(json["error_code"], 1);
    assert!(json["errors"]["email"].is_array());
}

#[tokio::test]
async fn test_reset_password_happy_path() {
    let (app, state) = spawn_app().await;

    let user_id = register_validated_user(
        &app,
        &state,
        "FakeUserName1234",
        "FakeUserName123@email.com",
        "FakePassword1234",
    )
    .await;

    // Request a reset to mint the row.
    let (cookie, csrf) = open_form(&app, "/forgot-password").await;
    let body = format!("email=FakeUserName123@email.com&csrf_token={csrf}");
    let response = app
        .clone()
        .oneshot(form_request("/forgot-password", Some(&cookie), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let row = state
        .store
        .get_forgot_password(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.attempts, 1);
    let token = row.reset_token;

    // Render the reset form from a fresh session.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/reset-password/{token}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reset_cookie = session_cookie(&response);
    let json = body_json(response).await;
    let reset_csrf = json["data"]["csrf_token"].as_str().unwrap().to_string();

    // Submit the new password.
    let body = format!(
        "new_password=NEW_PASSWORD!&confirm_new_password=NEW_PASSWORD!&csrf_token={reset_csrf}"
    );
    let response = app
        .clone()
        .oneshot(form_request(
            &format!("/reset-password/{token}"),
            Some(&reset_cookie),
            body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Password reset.");

    assert!(
        state
            .store
            .get_forgot_password(user_id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        state
            .store
            .verify_user_password("FakeUserName1234", "NEW_PASSWORD!")
            .await
            .unwrap()
    );
    assert!(
        !state
            .store
            .verify_user_password("FakeUserName1234", "FakePassword1234")
            .await
            .unwrap()
    );

    // No session was bound by the reset.
    let response = app
        .clone()
        .oneshot(get_request("/home", Some(&reset_cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/");

    // The consumed token is gone.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/reset-password/{token}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_csrf_is_required_on_identity_posts() {
    let (app, _state) = spawn_app().await;

    let body = "username=FakeUserName1234&email=a@b.com&confirm_email=a@b.com&password=FakePassword1234&confirm_password=FakePassword1234".to_string();
    let response = app
        .clone()
        .oneshot(form_request("/register", None, body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Missing or invalid CSRF token.");
}

#[tokio::test]
async fn test_login_next_whitelist() {
    let (app, state) = spawn_app().await;

    let user_id = register_validated_user(
        &app,
        &state,
        "FakeUserName1234",
        "FakeUserName123@email.com",
        "FakePassword1234",
    )
    .await;

    let utub = state
        .store
        .create_utub("Book Club", user_id, Utc::now())
        .await
        .unwrap();

    // Member: the candidate survives the whitelist.
    let (cookie, csrf) = open_form(&app, "/login").await;
    let body = format!("username=FakeUserName1234&password=FakePassword1234&csrf_token={csrf}");
    let uri = format!("/login?next=%2Fhome%3FUTubID%3D{}", utub.id);
    let response = app
        .clone()
        .oneshot(form_request(&uri, Some(&cookie), body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["data"]["redirect_url"],
        format!("/home?UTubID={}", utub.id)
    );

    // Unknown UTub: fall back to home.
    let response = app
        .clone()
        .oneshot(form_request(
            "/login?next=%2Fhome%3FUTubID%3D9999",
            Some(&cookie),
            body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["redirect_url"], "/home");
}
