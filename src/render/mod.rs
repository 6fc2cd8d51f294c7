//! Code Renderer
//!
//! Produces the distribution artifact for a registered peer, either via
//! the backend's `generate_qr` (remote) or the in-process encoder (local).
//!
//! - `local`: SVG QR encoder

pub mod local;

pub use local::LocalQrEncoder;

use std::sync::Arc;

use crate::backend::{CapabilityError, RemoteRenderer};
use crate::config::RenderPolicy;
use crate::error::ProvisionError;
use crate::models::{ArtifactSource, PeerIdentity, ProvisioningArtifact, RenderedCode};
use crate::wireguard::{config_filename, SecretKey};

/// Inputs for one render attempt
#[derive(Debug, Clone, Copy)]
pub struct RenderJob<'a> {
    pub peer: &'a PeerIdentity,
    /// `None` asks the backend to resolve the key itself
    pub private_key: Option<&'a SecretKey>,
    pub endpoint: &'a str,
    /// Locally synthesized config; present only when the key is known
    pub local_config: Option<&'a str>,
    /// The config carries overrides the backend cannot apply, so only the
    /// local config may be encoded
    pub customized: bool,
}

pub struct CodeRenderer {
    remote: Arc<dyn RemoteRenderer>,
    local: LocalQrEncoder,
    policy: RenderPolicy,
}

impl CodeRenderer {
    pub fn new(remote: Arc<dyn RemoteRenderer>, local: LocalQrEncoder, policy: RenderPolicy) -> Self {
        Self {
            remote,
            local,
            policy,
        }
    }

    pub async fn render(&self, job: RenderJob<'_>) -> Result<ProvisioningArtifact, ProvisionError> {
        if job.customized {
            return self.render_customized(job);
        }
        match self.policy {
            RenderPolicy::RemoteFirst => self.remote_then_local(job).await,
            RenderPolicy::LocalFirst => self.local_then_remote(job).await,
            RenderPolicy::RemoteOnly => self
                .render_remote(job)
                .await
                .map_err(|e| ProvisionError::RenderingUnavailable(e.message)),
            RenderPolicy::LocalOnly => match job.local_config {
                Some(text) => self.render_local(job.peer, text),
                None => Err(ProvisionError::RenderingUnavailable(
                    "private key not available for local rendering".to_string(),
                )),
            },
        }
    }

    fn render_customized(&self, job: RenderJob<'_>) -> Result<ProvisioningArtifact, ProvisionError> {
        if self.policy == RenderPolicy::RemoteOnly {
            return Err(ProvisionError::InvalidPeerField(
                "config overrides need local rendering, which render.policy remote_only disables"
                    .to_string(),
            ));
        }
        match job.local_config {
            Some(text) => {
                tracing::debug!(
                    "[Render] Overrides for {}, skipping the backend",
                    job.peer.short_id
                );
                self.render_local(job.peer, text)
            }
            None => Err(ProvisionError::RenderingUnavailable(
                "config overrides need the peer's private key".to_string(),
            )),
        }
    }

    /// Config text only, from the backend's `generate_config`
    pub async fn config_text(
        &self,
        peer: &PeerIdentity,
        private_key: Option<&SecretKey>,
        endpoint: &str,
    ) -> Result<String, CapabilityError> {
        self.remote
            .render_config_text(&peer.interface_name, &peer.public_key, private_key, endpoint)
            .await
    }

    /// Remote first; local only when the remote path failed and a local config exists
    async fn remote_then_local(
        &self,
        job: RenderJob<'_>,
    ) -> Result<ProvisioningArtifact, ProvisionError> {
        match self.render_remote(job).await {
            Ok(artifact) => Ok(artifact),
            Err(remote_err) => match job.local_config {
                Some(text) => {
                    tracing::warn!(
                        "[Render] Remote render failed for {}, encoding locally: {}",
                        job.peer.short_id,
                        remote_err
                    );
                    self.render_local(job.peer, text)
                }
                None => Err(ProvisionError::RenderingUnavailable(remote_err.message)),
            },
        }
    }

    async fn local_then_remote(
        &self,
        job: RenderJob<'_>,
    ) -> Result<ProvisioningArtifact, ProvisionError> {
        let local_err = match job.local_config {
            Some(text) => match self.render_local(job.peer, text) {
                Ok(artifact) => return Ok(artifact),
                Err(e) => Some(e),
            },
            None => None,
        };

        match self.render_remote(job).await {
            Ok(artifact) => Ok(artifact),
            Err(remote_err) => {
                Err(local_err.unwrap_or(ProvisionError::RenderingUnavailable(remote_err.message)))
            }
        }
    }

    async fn render_remote(
        &self,
        job: RenderJob<'_>,
    ) -> Result<ProvisioningArtifact, CapabilityError> {
        let remote = self
            .remote
            .render_remote(
                &job.peer.interface_name,
                &job.peer.public_key,
                job.private_key,
                job.endpoint,
            )
            .await?;

        tracing::debug!("[Render] Remote artifact for {}", job.peer.short_id);
        Ok(ProvisioningArtifact {
            peer: job.peer.clone(),
            config_text: remote.config_text,
            code: RenderedCode::Image(remote.code),
            source: ArtifactSource::Remote,
            filename: config_filename(job.peer),
        })
    }

    fn render_local(
        &self,
        peer: &PeerIdentity,
        config_text: &str,
    ) -> Result<ProvisioningArtifact, ProvisionError> {
        let svg = self.local.encode(config_text)?;

        tracing::debug!("[Render] Local artifact for {}", peer.short_id);
        Ok(ProvisioningArtifact {
            peer: peer.clone(),
            config_text: config_text.to_string(),
            code: RenderedCode::Svg(svg),
            source: ArtifactSource::Local,
            filename: config_filename(peer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::wireguard::keygen::generate_keypair;

    const LOCAL_TEXT: &str = "[Interface]\nPrivateKey = local\n";

    fn renderer(backend: Arc<MockBackend>, policy: RenderPolicy) -> CodeRenderer {
        CodeRenderer::new(backend, LocalQrEncoder::default(), policy)
    }

    fn peer() -> PeerIdentity {
        PeerIdentity::new("wg0", "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=")
    }

    #[tokio::test]
    async fn test_remote_first_uses_backend_text() {
        let backend = Arc::new(MockBackend::new());
        let pair = generate_keypair();
        let peer = peer();

        let artifact = renderer(backend.clone(), RenderPolicy::RemoteFirst)
            .render(RenderJob {
                peer: &peer,
                private_key: Some(&pair.private_key),
                endpoint: "vpn.example.com",
                local_config: Some(LOCAL_TEXT),
                customized: false,
            })
            .await
            .unwrap();

        assert_eq!(artifact.source, ArtifactSource::Remote);
        assert!(artifact.config_text.contains(pair.private_key.expose()));
        assert!(matches!(artifact.code, RenderedCode::Image(_)));
        assert_eq!(artifact.filename, "wg0-xTIBA5rb.conf");
    }

    #[tokio::test]
    async fn test_falls_back_to_local() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_on("generate_qr", CapabilityError::transport("timeout"));
        let peer = peer();

        let artifact = renderer(backend, RenderPolicy::RemoteFirst)
            .render(RenderJob {
                peer: &peer,
                private_key: None,
                endpoint: "vpn.example.com",
                local_config: Some(LOCAL_TEXT),
                customized: false,
            })
            .await
            .unwrap();

        assert_eq!(artifact.source, ArtifactSource::Local);
        assert_eq!(artifact.config_text, LOCAL_TEXT);
        match artifact.code {
            RenderedCode::Svg(svg) => {
                assert_eq!(svg, LocalQrEncoder::default().encode(LOCAL_TEXT).unwrap())
            }
            other => panic!("expected svg, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_local_config_is_unavailable() {
        let backend = Arc::new(MockBackend::new());
        let peer = peer();

        let err = renderer(backend, RenderPolicy::RemoteFirst)
            .render(RenderJob {
                peer: &peer,
                private_key: None,
                endpoint: "vpn.example.com",
                local_config: None,
                customized: false,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::RenderingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_local_first_skips_backend() {
        let backend = Arc::new(MockBackend::new());
        let peer = peer();

        let artifact = renderer(backend.clone(), RenderPolicy::LocalFirst)
            .render(RenderJob {
                peer: &peer,
                private_key: None,
                endpoint: "vpn.example.com",
                local_config: Some(LOCAL_TEXT),
                customized: false,
            })
            .await
            .unwrap();

        assert_eq!(artifact.source, ArtifactSource::Local);
        assert_eq!(backend.call_count("generate_qr"), 0);
    }

    #[tokio::test]
    async fn test_remote_only_never_encodes_locally() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_on("generate_qr", CapabilityError::rejected("qrencode missing"));
        let peer = peer();

        let err = renderer(backend, RenderPolicy::RemoteOnly)
            .render(RenderJob {
                peer: &peer,
                private_key: None,
                endpoint: "vpn.example.com",
                local_config: Some(LOCAL_TEXT),
                customized: false,
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProvisionError::RenderingUnavailable("qrencode missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_local_only_requires_key() {
        let backend = Arc::new(MockBackend::new());
        let peer = peer();

        let err = renderer(backend.clone(), RenderPolicy::LocalOnly)
            .render(RenderJob {
                peer: &peer,
                private_key: None,
                endpoint: "vpn.example.com",
                local_config: None,
                customized: false,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::RenderingUnavailable(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_customized_config_never_goes_remote() {
        let backend = Arc::new(MockBackend::new());
        let peer = peer();
        let job = RenderJob {
            peer: &peer,
            private_key: None,
            endpoint: "vpn.example.com",
            local_config: Some(LOCAL_TEXT),
            customized: true,
        };

        let artifact = renderer(backend.clone(), RenderPolicy::RemoteFirst)
            .render(job)
            .await
            .unwrap();
        assert_eq!(artifact.source, ArtifactSource::Local);
        assert_eq!(artifact.config_text, LOCAL_TEXT);

        let err = renderer(backend.clone(), RenderPolicy::RemoteFirst)
            .render(RenderJob {
                local_config: None,
                ..job
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::RenderingUnavailable(_)));

        let err = renderer(backend.clone(), RenderPolicy::RemoteOnly)
            .render(job)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidPeerField(_)));
        assert_eq!(backend.call_count("generate_qr"), 0);
    }
}
