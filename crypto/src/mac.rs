//! CCM-variant MAC used to authenticate every non-pairing transport packet.

use crate::cipher::{Block, TwofishKey};

/// Length of the authentication tag appended to every transport packet.
pub const MAC_LEN: usize = 8;

fn block0(prefix: u8, nonce: &[u8; 13]) -> Block {
    let mut b = [0u8; 16];
    b[0] = prefix;
    b[1..14].copy_from_slice(nonce);
    b[14] = 0;
    b[15] = 0;
    b
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

/// Computes the 8-byte MAC over `data`, keyed with `key` and bound to
/// `nonce`, per the documented CCM-style construction ([spec] §4.1).
#[must_use]
pub fn compute_mac(key: &TwofishKey, nonce: &[u8; 13], data: &[u8]) -> [u8; MAC_LEN] {
    let mut x = key.encrypt(block0(0x79, nonce));

    let mut chunks = data.chunks_exact(16);
    for block in chunks.by_ref() {
        let mut b: Block = block.try_into().expect("exact 16-byte chunk");
        xor_into(&mut b, &x);
        x = key.encrypt(b);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let k = rem.len();
        let mut b = x;
        xor_into(&mut b[..k], rem);
        let pad = (16 - k) as u8;
        for byte in &mut b[k..16] {
            *byte ^= pad;
        }
        x = key.encrypt(b);
    }
    let u = &x[..MAC_LEN];

    let x_prime = key.encrypt(block0(0x41, nonce));
    let mut mac = [0u8; MAC_LEN];
    for i in 0..MAC_LEN {
        mac[i] = u[i] ^ x_prime[i];
    }
    mac
}

/// Verifies that `mac` authenticates `data` under `key`/`nonce`.
#[must_use]
pub fn verify_mac(key: &TwofishKey, nonce: &[u8; 13], data: &[u8], mac: &[u8; MAC_LEN]) -> bool {
    compute_mac(key, nonce, data) == *mac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TwofishKey {
        TwofishKey::new(&[0xAB; 16])
    }

    #[test]
    fn mac_is_idempotent() {
        let k = key();
        let nonce = [1u8; 13];
        let data = b"some application payload bytes, more than 16 long";
        let m1 = compute_mac(&k, &nonce, data);
        let m2 = compute_mac(&k, &nonce, data);
        assert_eq!(m1, m2);
    }

    #[test]
    fn mac_changes_with_nonce() {
        let k = key();
        let data = b"payload";
        let m1 = compute_mac(&k, &[0u8; 13], data);
        let m2 = compute_mac(&k, &[1u8; 13], data);
        assert_ne!(m1, m2);
    }

    #[test]
    fn verify_round_trips() {
        let k = key();
        let nonce = [7u8; 13];
        let data = b"0123456789abcdef0123456789";
        let mac = compute_mac(&k, &nonce, data);
        assert!(verify_mac(&k, &nonce, data, &mac));
        let mut bad = mac;
        bad[0] ^= 1;
        assert!(!verify_mac(&k, &nonce, data, &bad));
    }

    #[test]
    fn handles_exact_multiple_of_block_size() {
        let k = key();
        let nonce = [2u8; 13];
        let data = [0x42u8; 32];
        let mac = compute_mac(&k, &nonce, &data);
        assert!(verify_mac(&k, &nonce, &data, &mac));
    }

    #[test]
    fn handles_empty_data() {
        let k = key();
        let nonce = [3u8; 13];
        let mac = compute_mac(&k, &nonce, &[]);
        assert!(verify_mac(&k, &nonce, &[], &mac));
    }
}
