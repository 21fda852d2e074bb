//! REST operations against a Jupyter server: kernelspecs, kernels, sessions.

use log::debug;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{
    Auth, Kernel, KernelRestartResponse, KernelSpecs, KernelStartRequest, Session,
    SessionCreateRequest, SessionKernelSpec, SessionUpdateRequest, SESSION_TYPE_NOTEBOOK,
};
use super::JupyterError;

/// HTTP client for a single Jupyter server.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    auth: Auth,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl Into<String>, auth: Auth) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        match &self.auth {
            Auth::None => builder,
            Auth::Token(token) => builder.header("Authorization", format!("token {token}")),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, JupyterError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(JupyterError::ServerStatus(status.as_u16()));
        }
        Ok(response.json::<T>().await?)
    }

    async fn send_expect(
        &self,
        builder: RequestBuilder,
        accepted: &[StatusCode],
    ) -> Result<(), JupyterError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() && !accepted.contains(&status) {
            return Err(JupyterError::ServerStatus(status.as_u16()));
        }
        Ok(())
    }

    fn json_body<B: Serialize>(builder: RequestBuilder, body: &B) -> RequestBuilder {
        builder
            .header("Content-Type", "application/json")
            .json(body)
    }

    // ------------------------------------------------------------------
    // Kernelspecs and kernels
    // ------------------------------------------------------------------

    /// `GET /api/kernelspecs`
    pub async fn kernel_specs(&self) -> Result<KernelSpecs, JupyterError> {
        self.send_json(self.request(Method::GET, "/api/kernelspecs"))
            .await
    }

    /// `GET /api/kernels`
    pub async fn list_kernels(&self) -> Result<Vec<Kernel>, JupyterError> {
        self.send_json(self.request(Method::GET, "/api/kernels"))
            .await
    }

    /// `GET /api/kernels/{id}`
    pub async fn get_kernel(&self, kernel_id: &str) -> Result<Kernel, JupyterError> {
        self.send_json(self.request(Method::GET, &format!("/api/kernels/{kernel_id}")))
            .await
    }

    /// `POST /api/kernels`
    pub async fn start_kernel(&self, name: &str) -> Result<Kernel, JupyterError> {
        let body = KernelStartRequest {
            name: name.to_string(),
            path: None,
        };
        self.send_json(Self::json_body(
            self.request(Method::POST, "/api/kernels"),
            &body,
        ))
        .await
    }

    /// `POST /api/kernels/{id}/restart`
    pub async fn restart_kernel(&self, kernel_id: &str) -> Result<bool, JupyterError> {
        let response: KernelRestartResponse = self
            .send_json(self.request(Method::POST, &format!("/api/kernels/{kernel_id}/restart")))
            .await?;
        debug!("restarted kernel {} ({})", response.id, response.name);
        Ok(response.restarted)
    }

    /// `POST /api/kernels/{id}/interrupt` (204 on success)
    pub async fn interrupt_kernel(&self, kernel_id: &str) -> Result<(), JupyterError> {
        self.send_expect(
            self.request(Method::POST, &format!("/api/kernels/{kernel_id}/interrupt")),
            &[StatusCode::NO_CONTENT],
        )
        .await
    }

    /// `DELETE /api/kernels/{id}` (204 on success)
    pub async fn shutdown_kernel(&self, kernel_id: &str) -> Result<(), JupyterError> {
        self.send_expect(
            self.request(Method::DELETE, &format!("/api/kernels/{kernel_id}")),
            &[StatusCode::NO_CONTENT],
        )
        .await
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// `GET /api/sessions`
    pub async fn list_sessions(&self) -> Result<Vec<Session>, JupyterError> {
        self.send_json(self.request(Method::GET, "/api/sessions"))
            .await
    }

    /// `GET /api/sessions/{id}`
    pub async fn get_session(&self, session_id: &str) -> Result<Session, JupyterError> {
        self.send_json(self.request(Method::GET, &format!("/api/sessions/{session_id}")))
            .await
    }

    /// `POST /api/sessions`: bind a notebook path to a freshly started kernel.
    pub async fn create_session(
        &self,
        name: &str,
        path: &str,
        kernel_name: &str,
    ) -> Result<Session, JupyterError> {
        let body = SessionCreateRequest {
            path: path.to_string(),
            name: name.to_string(),
            kind: SESSION_TYPE_NOTEBOOK.to_string(),
            kernel: SessionKernelSpec {
                name: kernel_name.to_string(),
                id: String::new(),
            },
        };
        self.send_json(Self::json_body(
            self.request(Method::POST, "/api/sessions"),
            &body,
        ))
        .await
    }

    /// `PATCH /api/sessions/{id}`: update path, name, or kernel binding.
    /// Empty arguments are left untouched.
    pub async fn modify_session(
        &self,
        session_id: &str,
        name: &str,
        path: &str,
        kernel_name: &str,
    ) -> Result<Session, JupyterError> {
        let body = SessionUpdateRequest {
            path: path.to_string(),
            name: name.to_string(),
            kernel: if kernel_name.is_empty() {
                None
            } else {
                Some(SessionKernelSpec {
                    name: kernel_name.to_string(),
                    id: String::new(),
                })
            },
        };
        self.send_json(Self::json_body(
            self.request(Method::PATCH, &format!("/api/sessions/{session_id}")),
            &body,
        ))
        .await
    }

    /// `DELETE /api/sessions/{id}` (204 on success)
    pub async fn delete_session(&self, session_id: &str) -> Result<(), JupyterError> {
        self.send_expect(
            self.request(Method::DELETE, &format!("/api/sessions/{session_id}")),
            &[StatusCode::NO_CONTENT],
        )
        .await
    }
}
