use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::types::{
    CommandBody, EvalResultBody, PendingEvalBody, ResourceInfo, ResumeMode, ResumeState,
    SetBreakpointBody, SetResumeModeBody,
};
use crate::{BackendError, Result, DEBUG_PREFIX, SERVER_PREFIX};

/// Async client for the backend's HTTP debug interface.
///
/// Every call is a single request/response exchange; the backend never pushes.
/// Context-specific endpoints take the context's endpoint suffix (`""`,
/// `"_server"` or `"_client"`).
#[derive(Clone, Debug)]
pub struct BackendClient {
    base_url: Url,
    timeout: Duration,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            timeout,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base_str = self.base_url.as_str().trim_end_matches('/').to_string();
        let base = Url::parse(&format!("{base_str}/"))?;
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        if response.status() != StatusCode::OK {
            return Err(BackendError::Status {
                path: path.to_owned(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| BackendError::Decode {
            path: path.to_owned(),
            message: err.to_string(),
        })
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Status {
                path: path.to_owned(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// `GET /MTADebug/get_info<suffix>`.
    pub async fn info(&self, suffix: &str) -> Result<ResourceInfo> {
        self.get_json(&format!("{DEBUG_PREFIX}/get_info{suffix}"))
            .await
    }

    /// `POST /MTADebug/set_breakpoint`. `line` uses the backend's 0-based numbering.
    pub async fn set_breakpoint(&self, file: &str, line: i64) -> Result<()> {
        self.post_json(
            &format!("{DEBUG_PREFIX}/set_breakpoint"),
            &SetBreakpointBody { file, line },
        )
        .await
    }

    /// `GET /MTADebug/clear_breakpoints`. Clears every breakpoint of every file.
    pub async fn clear_breakpoints(&self) -> Result<()> {
        let path = format!("{DEBUG_PREFIX}/clear_breakpoints");
        let url = self.endpoint(&path)?;
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Status {
                path,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// `POST /MTADebug/set_resume_mode<suffix>`.
    pub async fn set_resume_mode(&self, suffix: &str, resume_mode: ResumeMode) -> Result<()> {
        self.post_json(
            &format!("{DEBUG_PREFIX}/set_resume_mode{suffix}"),
            &SetResumeModeBody { resume_mode },
        )
        .await
    }

    /// `GET /MTADebug/get_resume_mode<suffix>`.
    pub async fn resume_state(&self, suffix: &str) -> Result<ResumeState> {
        self.get_json(&format!("{DEBUG_PREFIX}/get_resume_mode{suffix}"))
            .await
    }

    /// `POST /MTADebug/set_pending_eval`.
    pub async fn set_pending_eval(&self, expression: &str) -> Result<()> {
        self.post_json(
            &format!("{DEBUG_PREFIX}/set_pending_eval"),
            &PendingEvalBody {
                pending_eval: expression,
            },
        )
        .await
    }

    /// `GET /MTADebug/get_eval_result`.
    pub async fn eval_result(&self) -> Result<String> {
        let body: EvalResultBody = self
            .get_json(&format!("{DEBUG_PREFIX}/get_eval_result"))
            .await?;
        Ok(body.eval_result.unwrap_or_default())
    }

    /// `POST /MTAServer/command`, e.g. `restart <resource>`.
    pub async fn server_command(&self, command: &str) -> Result<()> {
        self.post_json(
            &format!("{SERVER_PREFIX}/command"),
            &CommandBody { command },
        )
        .await
    }
}
