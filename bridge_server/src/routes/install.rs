//! Human-facing installation pages and the OAuth2 callback.
//!
//! Three small pages rendered inline: a landing page, the post-install page
//! (pending / done, with a manual token form), and the OAuth2 authorization
//! callback that completes the credential exchange.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

use crate::models::installation::Installation;
use crate::routes::AppState;
use crate::services::oauth_service::{self, TokenResponse, BUILDS_GRANTS};

pub async fn index() -> Html<String> {
    Html(format!(
        "<!doctype html>\n<html><head><title>buildbridge</title></head><body>\n\
         <h1>buildbridge</h1>\n\
         <p>A GitHub App that submits build jobs to a remote builds service\n\
         for every commit and pull request, and reports the results back as\n\
         commit statuses.</p>\n\
         <p>Requested grants: <code>{}</code></p>\n\
         </body></html>",
        BUILDS_GRANTS
    ))
}

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub state: String,
    pub code: Option<String>,
    pub error: Option<String>,
}

/// OAuth2 callback: the provider sends the authorization code here together
/// with our `state` parameter carrying the installation id.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let Some(oauth) = &state.oauth else {
        return error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            "OAuth client not configured",
        );
    };

    let Some(id) = installation_id_from_state(&query.state) else {
        return error_page(StatusCode::BAD_REQUEST, "invalid state query parameter");
    };

    if let Some(err_code) = &query.error {
        return error_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("authorization failed: {err_code}"),
        );
    }

    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        return error_page(StatusCode::BAD_REQUEST, "invalid code query parameter");
    };

    let mut installation = match state.store.get(id).await {
        Ok(Some(installation)) => installation,
        Ok(None) => return error_page(StatusCode::NOT_FOUND, "unknown installation"),
        Err(err) => {
            tracing::error!(installation_id = id, error = %err, "failed to get installation");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to get installation",
            );
        }
    };

    let token = match oauth.exchange_code(code).await {
        Ok(token) => token,
        Err(err) => {
            tracing::error!(error = %err, "failed to exchange authorization code");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to perform OAuth2 exchange",
            );
        }
    };

    if let Err(err) = oauth_service::save_token(
        &state.store,
        &state.config.builds_endpoint,
        &mut installation,
        &token,
    )
    .await
    {
        tracing::error!(error = %err, "failed to save builds token");
        return error_page(StatusCode::INTERNAL_SERVER_ERROR, "invalid builds token");
    }

    Redirect::temporary(&format!("/post-install?installation_id={id}")).into_response()
}

#[derive(Deserialize)]
pub struct PostInstallQuery {
    pub installation_id: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct PostInstallForm {
    #[serde(default)]
    pub token: String,
}

pub async fn post_install(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PostInstallQuery>,
) -> Response {
    render_post_install(&state, query.installation_id, None).await
}

/// Same page, but accepting a manually created token from the form. Used
/// when no OAuth client is configured for the provider.
pub async fn post_install_submit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PostInstallQuery>,
    Form(form): Form<PostInstallForm>,
) -> Response {
    let token = (!form.token.is_empty()).then_some(form.token);
    render_post_install(&state, query.installation_id, token).await
}

async fn render_post_install(
    state: &AppState,
    installation_id: Option<i64>,
    manual_token: Option<String>,
) -> Response {
    let Some(id) = installation_id else {
        return error_page(StatusCode::BAD_REQUEST, "invalid installation_id");
    };

    let mut installation = match state.store.get(id).await {
        Ok(installation) => installation,
        Err(err) => {
            tracing::error!(installation_id = id, error = %err, "failed to get installation");
            return error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to get installation",
            );
        }
    };

    if let (Some(record), Some(token)) = (installation.as_mut(), manual_token) {
        if record.is_pending() {
            let token = TokenResponse::bearer(token);
            if let Err(err) = oauth_service::save_token(
                &state.store,
                &state.config.builds_endpoint,
                record,
                &token,
            )
            .await
            {
                tracing::error!(error = %err, "failed to save manual builds token");
                return error_page(StatusCode::BAD_REQUEST, "invalid builds token");
            }
        }
    }

    // With an OAuth client configured, a pending installation goes through
    // the provider's authorization page instead.
    if let (Some(record), Some(oauth)) = (&installation, &state.oauth) {
        if record.is_pending() {
            let auth_state = format!("installation_id={id}");
            return Redirect::temporary(&oauth.authorization_url(&auth_state)).into_response();
        }
    }

    Html(post_install_page(installation.as_ref())).into_response()
}

fn post_install_page(installation: Option<&Installation>) -> String {
    let body = match installation {
        None => format!(
            "<p>Waiting for GitHub to confirm the installation…</p>\n\
             <p>Reload this page in a few seconds, or paste a builds service\n\
             token created with grants <code>{BUILDS_GRANTS}</code>:</p>\n\
             {FORM}"
        ),
        Some(record) if record.is_pending() => format!(
            "<p>Installation registered. Paste a builds service token\n\
             created with grants <code>{BUILDS_GRANTS}</code>:</p>\n\
             {FORM}"
        ),
        Some(record) => format!(
            "<p>All done! Builds will be submitted for every commit and\n\
             pull request.</p>\n\
             <p><a href=\"{}\">Manage the installation on GitHub</a></p>",
            record.settings_url()
        ),
    };
    format!(
        "<!doctype html>\n<html><head><title>buildbridge</title></head><body>\n\
         <h1>buildbridge</h1>\n{body}\n</body></html>"
    )
}

const FORM: &str = "<form method=\"post\">\n\
    <input type=\"password\" name=\"token\" placeholder=\"builds token\">\n\
    <button type=\"submit\">Save</button>\n</form>";

fn installation_id_from_state(state: &str) -> Option<i64> {
    url::form_urlencoded::parse(state.as_bytes())
        .find(|(key, _)| key == "installation_id")
        .and_then(|(_, value)| value.parse().ok())
}

fn error_page(status: StatusCode, message: &str) -> Response {
    (status, message.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_installation_id_from_state() {
        assert_eq!(installation_id_from_state("installation_id=42"), Some(42));
        assert_eq!(
            installation_id_from_state("foo=bar&installation_id=7"),
            Some(7)
        );
        assert_eq!(installation_id_from_state("installation_id=x"), None);
        assert_eq!(installation_id_from_state(""), None);
    }

    #[test]
    fn post_install_page_states() {
        let pending = post_install_page(None);
        assert!(pending.contains("Waiting for GitHub"));

        let registered = Installation::new(1, "alice", None);
        assert!(post_install_page(Some(&registered)).contains("Paste a builds service token"));

        let mut done = Installation::new(1, "alice", None);
        done.access_token = Some("t".to_string());
        assert!(post_install_page(Some(&done)).contains("All done"));
    }
}
