// src/config.rs
// Bridge broker configuration template (spec section 6), rendered
// verbatim against `original_source/beem/bridge.py`'s
// MOSQ_BRIDGE_CFG_TEMPLATE / MOSQ_BRIDGE_CFG_TEMPLATE_PSK.
//
// PSK credential parsing itself lives in malaria-core::psk, shared with
// the worker pool's key-file-derived process count.

pub use malaria_core::psk::PskCredentials;

// render renders the bridge config text for one bridging sender.
pub fn render(
    listen_port: u16,
    target_host: &str,
    target_port: u16,
    cid: &str,
    qos: u8,
    psk: Option<&PskCredentials>,
) -> String {
    let mut out = format!(
        "log_dest topic\n\
         bind_address 127.0.0.1\n\
         port {listen_port}\n\
         connection mal-bridge-{cid}\n\
         address {target_host}:{target_port}\n\
         topic mqtt-malaria/# out {qos}\n"
    );

    if let Some(psk) = psk {
        out.push_str(&format!(
            "bridge_identity {}\n\
             bridge_psk {}\n\
             bridge_tls_version tlsv1\n",
            psk.identity, psk.key
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_base_template_without_psk() {
        let cfg = render(18832, "broker.example", 1883, "worker-0", 1, None);
        assert_eq!(
            cfg,
            "log_dest topic\n\
             bind_address 127.0.0.1\n\
             port 18832\n\
             connection mal-bridge-worker-0\n\
             address broker.example:1883\n\
             topic mqtt-malaria/# out 1\n"
        );
    }

    #[test]
    fn appends_psk_block_when_supplied() {
        let psk = PskCredentials::parse("abc123:deadbeef").unwrap();
        let cfg = render(18832, "broker.example", 1883, "worker-0", 1, Some(&psk));
        assert!(cfg.ends_with(
            "bridge_identity abc123\n\
             bridge_psk deadbeef\n\
             bridge_tls_version tlsv1\n"
        ));
    }
}
