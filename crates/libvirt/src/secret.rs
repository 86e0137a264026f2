// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic libvirt Secret UUID derivation (§4.8 "Identity").
//!
//! Both UUIDs are recomputed from `(domain_uuid, volume_name)` on every
//! reconcile, never read back from stored state, so a restart loses nothing.

use uuid::Uuid;

pub fn auth_secret_uuid(domain_uuid: Uuid, volume_name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::nil(), format!("{domain_uuid}/{volume_name}").as_bytes())
}

pub fn enc_secret_uuid(domain_uuid: Uuid, volume_name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::nil(), format!("enc/{domain_uuid}/{volume_name}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_uuids_are_deterministic_and_distinct() {
        let domain = Uuid::new_v4();
        assert_eq!(auth_secret_uuid(domain, "v1"), auth_secret_uuid(domain, "v1"));
        assert_ne!(auth_secret_uuid(domain, "v1"), enc_secret_uuid(domain, "v1"));
        assert_ne!(auth_secret_uuid(domain, "v1"), auth_secret_uuid(domain, "v2"));
    }
}
