//! Session encryption: X25519 key exchange, blake3 key derivation, and
//! ChaCha20-Poly1305 authenticated sealing of every payload.
//!
//! Both ends contribute an ephemeral X25519 key during the handshake.
//! Two directional keys are derived from the shared secret and the host's
//! challenge nonce, so host→viewer and viewer→host traffic never share a
//! nonce space. Per-packet nonces are deterministic:
//!
//! ```text
//! nonce[0]    = direction (0 = host→viewer, 1 = viewer→host)
//! nonce[1]    = channel id
//! nonce[2]    = domain (0 = sequenced, 1 = ACK, 2 = handshake)
//! nonce[3..8] = zero
//! nonce[8..12]= packet sequence / domain counter (little-endian)
//! ```
//!
//! ACK and handshake frames draw their counters from dedicated spaces,
//! separated from channel sequences by the domain byte. A
//! reliable-channel retransmission reuses its sequence number and
//! therefore re-seals to the identical ciphertext; nonces are never
//! reused with distinct plaintexts.

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce, Tag,
    aead::{AeadInPlace, KeyInit},
};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::GlintError;
use crate::flags::PacketFlags;
use crate::header::PacketHeader;
use crate::packet::TAG_SIZE;

/// Handshake challenge nonce length.
pub const CHALLENGE_NONCE_SIZE: usize = 16;

// ── Role ─────────────────────────────────────────────────────────

/// Which end of the session this peer is. Selects the seal/open
/// direction bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Viewer,
}

impl Role {
    const fn seal_direction(self) -> u8 {
        match self {
            Role::Host => 0,
            Role::Viewer => 1,
        }
    }

    const fn open_direction(self) -> u8 {
        match self {
            Role::Host => 1,
            Role::Viewer => 0,
        }
    }
}

// ── KeyExchange ──────────────────────────────────────────────────

/// One side's ephemeral X25519 keypair for the handshake.
pub struct KeyExchange {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyExchange {
    /// Generate a fresh ephemeral keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public key bytes to place in the handshake message.
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Complete the exchange against the peer's public key and derive
    /// the directional session keys.
    pub fn derive(
        self,
        peer_public: &[u8; 32],
        challenge_nonce: &[u8; CHALLENGE_NONCE_SIZE],
        role: Role,
    ) -> SessionCrypto {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));

        let mut ikm = Vec::with_capacity(32 + CHALLENGE_NONCE_SIZE);
        ikm.extend_from_slice(shared.as_bytes());
        ikm.extend_from_slice(challenge_nonce);

        let host_key = blake3::derive_key("glint v1 host-to-viewer", &ikm);
        let viewer_key = blake3::derive_key("glint v1 viewer-to-host", &ikm);

        let (seal_key, open_key) = match role {
            Role::Host => (host_key, viewer_key),
            Role::Viewer => (viewer_key, host_key),
        };

        SessionCrypto {
            seal: ChaCha20Poly1305::new(Key::from_slice(&seal_key)),
            open: ChaCha20Poly1305::new(Key::from_slice(&open_key)),
            role,
        }
    }
}

// ── SessionCrypto ────────────────────────────────────────────────

/// Negotiated session keys. Seals outbound payloads and opens inbound
/// ones, binding the clear-text header as associated data.
pub struct SessionCrypto {
    seal: ChaCha20Poly1305,
    open: ChaCha20Poly1305,
    role: Role,
}

impl SessionCrypto {
    /// Seal a plaintext payload for the given header.
    ///
    /// `header.payload_len` must already equal `plaintext.len()` —
    /// ChaCha20 ciphertext has the same length as its plaintext.
    pub fn seal(
        &self,
        header: &PacketHeader,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_SIZE]), GlintError> {
        let nonce = packet_nonce(self.role.seal_direction(), header);
        let mut buffer = plaintext.to_vec();
        let tag = self
            .seal
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), &header.encode(), &mut buffer)
            .map_err(|_| GlintError::Crypto("seal failed"))?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag.as_slice());
        Ok((buffer, tag_bytes))
    }

    /// Open a sealed payload. Returns [`GlintError::AuthenticationFailure`]
    /// when the tag does not verify; the caller drops the packet without
    /// processing it.
    pub fn open(
        &self,
        header: &PacketHeader,
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
    ) -> Result<Vec<u8>, GlintError> {
        let nonce = packet_nonce(self.role.open_direction(), header);
        let mut buffer = ciphertext.to_vec();
        self.open
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                &header.encode(),
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| GlintError::AuthenticationFailure)?;
        Ok(buffer)
    }
}

fn packet_nonce(direction: u8, header: &PacketHeader) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0] = direction;
    nonce[1] = header.channel as u8;
    nonce[2] = if header.flags.contains(PacketFlags::ACK) {
        1
    } else if header.flags.contains(PacketFlags::HANDSHAKE) {
        2
    } else {
        0
    };
    nonce[8..12].copy_from_slice(&header.sequence.to_le_bytes());
    nonce
}

// ── Credentials ──────────────────────────────────────────────────

/// Viewer-side credential material: turns the host's challenge nonce
/// into an auth proof. Supplied by the embedding identity provider.
pub trait CredentialProver: Send + Sync {
    fn prove(&self, nonce: &[u8; CHALLENGE_NONCE_SIZE]) -> Vec<u8>;
}

/// Host-side credential check for a received auth proof.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, nonce: &[u8; CHALLENGE_NONCE_SIZE], proof: &[u8]) -> bool;
}

/// Pre-shared-secret credential: the proof is a keyed blake3 hash of the
/// challenge nonce.
#[derive(Clone)]
pub struct SharedSecretCredential {
    key: [u8; 32],
}

impl SharedSecretCredential {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: *blake3::hash(secret).as_bytes(),
        }
    }
}

impl CredentialProver for SharedSecretCredential {
    fn prove(&self, nonce: &[u8; CHALLENGE_NONCE_SIZE]) -> Vec<u8> {
        blake3::keyed_hash(&self.key, nonce).as_bytes().to_vec()
    }
}

impl CredentialVerifier for SharedSecretCredential {
    fn verify(&self, nonce: &[u8; CHALLENGE_NONCE_SIZE], proof: &[u8]) -> bool {
        proof == blake3::keyed_hash(&self.key, nonce).as_bytes()
    }
}

/// Generate a random challenge nonce.
pub fn challenge_nonce() -> [u8; CHALLENGE_NONCE_SIZE] {
    use rand::RngCore;
    let mut nonce = [0u8; CHALLENGE_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelId;
    use crate::flags::PacketFlags;

    fn session_pair() -> (SessionCrypto, SessionCrypto) {
        let host = KeyExchange::generate();
        let viewer = KeyExchange::generate();
        let nonce = challenge_nonce();

        let host_pub = host.public_bytes();
        let viewer_pub = viewer.public_bytes();

        let host_crypto = host.derive(&viewer_pub, &nonce, Role::Host);
        let viewer_crypto = viewer.derive(&host_pub, &nonce, Role::Viewer);
        (host_crypto, viewer_crypto)
    }

    fn header(len: usize) -> PacketHeader {
        PacketHeader::new(ChannelId::Video, 42, PacketFlags::KEYFRAME, len as u32)
    }

    #[test]
    fn seal_open_roundtrip() {
        let (host, viewer) = session_pair();
        let plaintext = b"frame bytes".to_vec();
        let hdr = header(plaintext.len());

        let (ct, tag) = host.seal(&hdr, &plaintext).unwrap();
        assert_ne!(ct, plaintext);

        let opened = viewer.open(&hdr, &ct, &tag).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_payload_fails_auth() {
        let (host, viewer) = session_pair();
        let hdr = header(4);
        let (mut ct, tag) = host.seal(&hdr, &[1, 2, 3, 4]).unwrap();
        ct[0] ^= 0xFF;
        assert!(matches!(
            viewer.open(&hdr, &ct, &tag),
            Err(GlintError::AuthenticationFailure)
        ));
    }

    #[test]
    fn tampered_header_fails_auth() {
        let (host, viewer) = session_pair();
        let hdr = header(4);
        let (ct, tag) = host.seal(&hdr, &[1, 2, 3, 4]).unwrap();

        // Same ciphertext presented under a different sequence number.
        let forged = PacketHeader::new(hdr.channel, hdr.sequence + 1, hdr.flags, hdr.payload_len);
        assert!(viewer.open(&forged, &ct, &tag).is_err());
    }

    #[test]
    fn directions_are_independent() {
        let (host, viewer) = session_pair();
        let hdr = header(3);

        let (host_ct, _) = host.seal(&hdr, &[7, 7, 7]).unwrap();
        let (viewer_ct, _) = viewer.seal(&hdr, &[7, 7, 7]).unwrap();
        assert_ne!(host_ct, viewer_ct);
    }

    #[test]
    fn shared_secret_credential_verifies() {
        let cred = SharedSecretCredential::new(b"hunter2");
        let nonce = challenge_nonce();
        let proof = cred.prove(&nonce);
        assert!(cred.verify(&nonce, &proof));

        let other = SharedSecretCredential::new(b"wrong");
        assert!(!other.verify(&nonce, &proof));
    }
}
