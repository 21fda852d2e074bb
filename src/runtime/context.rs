//! Kernel context provisioning and CRUD.

use std::path::Path;
use std::time::Duration;

use log::error;
use rand::Rng;
use tokio::time::sleep;

use super::{
    CodeContext, Controller, CreateContextRequest, KernelContext, Language, RuntimeError,
    RuntimeResult,
};
use crate::jupyter::{self, JupyterError, KernelSpecs, Session};

/// Exponential backoff with symmetric jitter.
///
/// A freshly started kernel is not immediately listed by the server, so
/// context creation retries the whole create-and-confirm workflow.
pub(crate) struct Backoff {
    steps: u32,
    duration: Duration,
    factor: f64,
    jitter: f64,
}

impl Backoff {
    pub(crate) fn new(steps: u32, duration: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            steps,
            duration,
            factor,
            jitter,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.steps == 0 {
            return None;
        }
        self.steps -= 1;

        let spread = rand::thread_rng().gen_range(-1.0..=1.0);
        let delay = self.duration.mul_f64(1.0 + self.jitter * spread);
        self.duration = self.duration.mul_f64(self.factor);
        Some(delay)
    }
}

pub(crate) fn kernel_waiting_backoff() -> Backoff {
    Backoff::new(60, Duration::from_millis(500), 1.5, 0.1)
}

/// Pick a kernelspec name for a language. The spec named `python3` is never
/// chosen: when several Python kernels are registered the non-stock one wins.
pub(crate) fn search_kernel(specs: &KernelSpecs, language: Language) -> RuntimeResult<String> {
    if specs.kernelspecs.is_empty() {
        return Err(RuntimeError::NoKernelSpec);
    }

    let mut kernel_name = None;
    for (name, spec) in &specs.kernelspecs {
        if name == "python3" {
            continue;
        }
        if spec.spec.language == language.as_str() {
            kernel_name = Some(name.clone());
        }
    }

    kernel_name.ok_or(RuntimeError::NoKernelSpec)
}

impl Controller {
    /// Provision a kernel-backed session and return its context id.
    pub async fn create_context(&self, request: &CreateContextRequest) -> RuntimeResult<String> {
        let client = self.jupyter_client()?;
        let mut backoff = kernel_waiting_backoff();

        let (context_id, session) = loop {
            match self.try_create_session(&client, request).await {
                Ok(created) => break created,
                Err(err) => {
                    error!("failed to create session, retrying: {err}");
                    match backoff.next_delay() {
                        Some(delay) => sleep(delay).await,
                        None => return Err(err),
                    }
                }
            }
        };

        self.store_kernel_context(
            context_id.clone(),
            KernelContext::new(session.kernel.id, session.id, request.language),
        )
        .await;

        Ok(context_id)
    }

    /// One attempt at the full creation workflow: pick a kernelspec, create a
    /// session for a client-generated id, then confirm the kernel is listed.
    async fn try_create_session(
        &self,
        client: &jupyter::Client,
        request: &CreateContextRequest,
    ) -> RuntimeResult<(String, Session)> {
        let specs = client.kernel_specs().await?;
        let kernel_name = search_kernel(&specs, request.language)?;

        let context_id = Self::new_context_id();
        let ipynb = new_ipynb_path(&context_id, &request.cwd)?;
        let session = client
            .create_session(&context_id, &ipynb, &kernel_name)
            .await?;

        let kernels = client.list_kernels().await?;
        if !kernels.iter().any(|k| k.id == session.kernel.id) {
            return Err(RuntimeError::Jupyter(JupyterError::KernelNotFound));
        }

        Ok((context_id, session))
    }

    /// Resolve the default context for a language, creating it when absent.
    /// Double-checked under the provisioning lock: two concurrent requests
    /// for the same language produce one creation and one waiter.
    pub(super) async fn get_or_create_default(&self, language: Language) -> RuntimeResult<String> {
        {
            let registry = self.registry.read().await;
            if let Some(id) = registry.defaults.get(&language) {
                return Ok(id.clone());
            }
        }

        let _guard = self.provision.lock().await;
        {
            let registry = self.registry.read().await;
            if let Some(id) = registry.defaults.get(&language) {
                return Ok(id.clone());
            }
        }

        let id = self
            .create_context(&CreateContextRequest {
                language,
                cwd: String::new(),
            })
            .await?;

        let mut registry = self.registry.write().await;
        registry.defaults.insert(language, id.clone());
        Ok(id)
    }

    pub async fn get_context(&self, session: &str) -> RuntimeResult<CodeContext> {
        let kernel = self
            .get_kernel_context(session)
            .await
            .ok_or(RuntimeError::ContextNotFound)?;

        Ok(CodeContext {
            id: session.to_string(),
            language: kernel.language,
        })
    }

    /// List contexts, optionally filtered by language. The shell and SQL
    /// pseudo-languages have no kernel contexts to list.
    pub async fn list_contexts(&self, language: &str) -> RuntimeResult<Vec<CodeContext>> {
        match language {
            "command" | "background-command" | "sql" => Err(RuntimeError::UnsupportedLanguage(
                language.to_string(),
            )),
            filter => {
                let registry = self.registry.read().await;
                let mut contexts: Vec<CodeContext> = registry
                    .kernels
                    .iter()
                    .filter(|(_, kernel)| filter.is_empty() || kernel.language.as_str() == filter)
                    .map(|(id, kernel)| CodeContext {
                        id: id.clone(),
                        language: kernel.language,
                    })
                    .collect();
                contexts.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(contexts)
            }
        }
    }

    pub async fn delete_context(&self, session: &str) -> RuntimeResult<()> {
        let kernel = self
            .get_kernel_context(session)
            .await
            .ok_or(RuntimeError::ContextNotFound)?;

        self.jupyter_client()?
            .delete_session(&kernel.jupyter_session)
            .await?;

        let mut registry = self.registry.write().await;
        registry.kernels.remove(session);
        registry.defaults.retain(|_, id| id != session);
        Ok(())
    }

    /// Delete every kernel context of a language, the implicit default
    /// included.
    pub async fn delete_language_contexts(&self, language: Language) -> RuntimeResult<()> {
        if !language.is_kernel() {
            return Err(RuntimeError::UnsupportedLanguage(language.to_string()));
        }

        let contexts = self.list_contexts(language.as_str()).await?;
        for context in contexts {
            self.delete_context(&context.id).await?;
        }
        Ok(())
    }
}

fn new_ipynb_path(session_id: &str, cwd: &str) -> RuntimeResult<String> {
    if !cwd.is_empty() {
        std::fs::create_dir_all(cwd)?;
    }
    Ok(Path::new(cwd)
        .join(format!("{session_id}.ipynb"))
        .to_string_lossy()
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jupyter::{KernelSpecDetail, KernelSpecInfo};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn spec(language: &str) -> KernelSpecInfo {
        KernelSpecInfo {
            name: String::new(),
            spec: KernelSpecDetail {
                argv: Vec::new(),
                display_name: language.to_string(),
                language: language.to_string(),
                interrupt_mode: String::new(),
            },
            resources: None,
        }
    }

    fn specs(entries: &[(&str, &str)]) -> KernelSpecs {
        KernelSpecs {
            default: String::new(),
            kernelspecs: entries
                .iter()
                .map(|(name, lang)| (name.to_string(), spec(lang)))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn search_kernel_skips_the_stock_python_spec() {
        let listing = specs(&[("python3", "python"), ("sandbox-python", "python")]);
        assert_eq!(
            search_kernel(&listing, Language::Python).unwrap(),
            "sandbox-python"
        );
    }

    #[test]
    fn search_kernel_fails_when_only_python3_matches() {
        let listing = specs(&[("python3", "python")]);
        assert!(matches!(
            search_kernel(&listing, Language::Python),
            Err(RuntimeError::NoKernelSpec)
        ));
    }

    #[test]
    fn search_kernel_fails_on_empty_listing() {
        let listing = specs(&[]);
        assert!(matches!(
            search_kernel(&listing, Language::Go),
            Err(RuntimeError::NoKernelSpec)
        ));
    }

    #[test]
    fn backoff_grows_and_stays_within_jitter() {
        let mut backoff = Backoff::new(3, Duration::from_millis(500), 1.5, 0.1);

        let first = backoff.next_delay().unwrap();
        assert!(first >= Duration::from_millis(450) && first <= Duration::from_millis(550));

        let second = backoff.next_delay().unwrap();
        assert!(second >= Duration::from_millis(675) && second <= Duration::from_millis(825));

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn ipynb_path_joins_cwd_and_session() {
        let path = new_ipynb_path("abc123", "").unwrap();
        assert_eq!(path, "abc123.ipynb");
    }

    #[tokio::test]
    async fn registry_crud_honours_the_round_trip_law() {
        let controller = Arc::new(Controller::new("", ""));
        controller
            .store_kernel_context(
                "ctx1".to_string(),
                KernelContext::new("k1", "jsess1", Language::Python),
            )
            .await;

        let context = controller.get_context("ctx1").await.unwrap();
        assert_eq!(context.language, Language::Python);

        assert!(matches!(
            controller.get_context("missing").await,
            Err(RuntimeError::ContextNotFound)
        ));
    }

    #[tokio::test]
    async fn list_contexts_rejects_non_kernel_languages() {
        let controller = Controller::new("", "");
        for lang in ["command", "background-command", "sql"] {
            assert!(matches!(
                controller.list_contexts(lang).await,
                Err(RuntimeError::UnsupportedLanguage(_))
            ));
        }
    }

    #[tokio::test]
    async fn list_contexts_filters_by_language_without_duplicates() {
        let controller = Arc::new(Controller::new("", ""));
        controller
            .store_kernel_context(
                "py1".to_string(),
                KernelContext::new("k1", "j1", Language::Python),
            )
            .await;
        controller
            .store_kernel_context(
                "py2".to_string(),
                KernelContext::new("k2", "j2", Language::Python),
            )
            .await;
        controller
            .store_kernel_context(
                "go1".to_string(),
                KernelContext::new("k3", "j3", Language::Go),
            )
            .await;
        // mark py1 as the language default; it must not be listed twice
        {
            let mut registry = controller.registry.write().await;
            registry.defaults.insert(Language::Python, "py1".to_string());
        }

        let python = controller.list_contexts("python").await.unwrap();
        assert_eq!(python.len(), 2);

        let all = controller.list_contexts("").await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
