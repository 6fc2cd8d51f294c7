//! In-process QR encoder (SVG output)

use qrcode::render::svg;
use qrcode::types::QrError;
use qrcode::{EcLevel, QrCode};

use crate::config::RenderConfig;
use crate::error::ProvisionError;

#[derive(Debug, Clone, Copy)]
pub struct LocalQrEncoder {
    ec_level: EcLevel,
    min_dimension: u32,
}

pub fn parse_ec_level(raw: &str) -> EcLevel {
    match raw {
        "M" => EcLevel::M,
        "Q" => EcLevel::Q,
        "H" => EcLevel::H,
        _ => EcLevel::L,
    }
}

impl LocalQrEncoder {
    pub fn new(ec_level: EcLevel, min_dimension: u32) -> Self {
        Self {
            ec_level,
            min_dimension,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(parse_ec_level(&config.ec_level), config.min_dimension)
    }

    /// Smallest QR version holding `text` at the configured EC level
    pub fn code(&self, text: &str) -> Result<QrCode, ProvisionError> {
        QrCode::with_error_correction_level(text.as_bytes(), self.ec_level).map_err(|e| match e {
            QrError::DataTooLong => ProvisionError::PayloadTooLarge { len: text.len() },
            other => ProvisionError::RenderingUnavailable(format!("QR encoding failed: {}", other)),
        })
    }

    /// Encode text as an SVG QR code
    pub fn encode(&self, text: &str) -> Result<String, ProvisionError> {
        Ok(self
            .code(text)?
            .render::<svg::Color>()
            .min_dimensions(self.min_dimension, self.min_dimension)
            .build())
    }
}

impl Default for LocalQrEncoder {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrcode::Color;
    use tokio_test::{assert_err, assert_ok};

    use crate::models::{parse_cidr_list, PeerIdentity, PeerNetworkConfig, ServerIdentity};
    use crate::wireguard::keygen::generate_keypair;
    use crate::wireguard::{synthesize, ClientConfigOptions};

    const SCALE: usize = 4;
    const QUIET_ZONE: usize = 4;

    /// Rasterize the module grid and read it back with an independent decoder
    fn scan(code: &QrCode) -> String {
        let width = code.width();
        let colors = code.to_colors();
        let side = (width + 2 * QUIET_ZONE) * SCALE;

        let mut img = rqrr::PreparedImage::prepare_from_greyscale(side, side, |x, y| {
            let (mx, my) = (x / SCALE, y / SCALE);
            if mx < QUIET_ZONE || my < QUIET_ZONE {
                return 255;
            }
            let (mx, my) = (mx - QUIET_ZONE, my - QUIET_ZONE);
            if mx >= width || my >= width {
                return 255;
            }
            match colors[my * width + mx] {
                Color::Dark => 0,
                Color::Light => 255,
            }
        });
        let grids = img.detect_grids();
        assert_eq!(grids.len(), 1, "expected exactly one QR code");
        let (_meta, content) = grids[0].decode().unwrap();
        content
    }

    #[test]
    fn test_encode_is_deterministic() {
        let encoder = LocalQrEncoder::default();
        let text = "[Interface]\nPrivateKey = abc\n";
        let a = encoder.encode(text).unwrap();
        let b = encoder.encode(text).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("<svg"));
    }

    #[test]
    fn test_oversized_payload() {
        let encoder = LocalQrEncoder::default();
        let text = "x".repeat(4000);
        assert_eq!(
            assert_err!(encoder.encode(&text)),
            ProvisionError::PayloadTooLarge { len: 4000 }
        );
    }

    #[test]
    fn test_higher_ec_level_lowers_capacity() {
        // 2000 bytes fit at L but not at H
        let text = "x".repeat(2000);
        assert_ok!(LocalQrEncoder::new(EcLevel::L, 200).encode(&text));
        assert!(matches!(
            LocalQrEncoder::new(EcLevel::H, 200).encode(&text),
            Err(ProvisionError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_parse_ec_level() {
        assert_eq!(parse_ec_level("H"), EcLevel::H);
        assert_eq!(parse_ec_level("anything"), EcLevel::L);
    }

    #[test]
    fn test_full_config_scans_back_byte_for_byte() {
        let client = generate_keypair();
        let server = generate_keypair();
        let peer = PeerIdentity::new("wg0", &client.public_key);
        let net = PeerNetworkConfig {
            allowed_ips: parse_cidr_list("10.0.0.2/32").unwrap(),
            persistent_keepalive: 25,
            preshared_key: client
                .preshared_key
                .as_ref()
                .map(|k| k.expose().to_string()),
            ..Default::default()
        };
        let opts = ClientConfigOptions {
            mtu: Some(1420),
            ..Default::default()
        };
        let text = synthesize(
            &peer,
            &net,
            &ServerIdentity {
                public_key: server.public_key.clone(),
                listen_port: 51820,
            },
            client.private_key.expose(),
            "vpn.example.com",
            &opts,
        )
        .unwrap();
        assert!(text.len() > 280, "config is {} bytes", text.len());
        assert!(text.contains("PresharedKey = "));

        let code = assert_ok!(LocalQrEncoder::default().code(&text));
        assert_eq!(scan(&code), text);
    }
}
