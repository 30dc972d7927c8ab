//! Admission handshake: RSA challenge-response.
//!
//! Flow: client sends `auth` with its claimed id, the server encrypts a
//! random challenge under that id's registered public key, and the client
//! proves key possession by returning the plaintext. The plaintext never
//! travels server-to-client, so a passive observer learns nothing useful
//! and an id claim without the key cannot complete.
//!
//! These are pure protocol steps; the connection loop in `server` drives
//! them against the socket and applies the timeout.

use crate::config::ClientIdentity;
use tether_core::{crypto, Message, TetherResult};

/// A challenge issued for one handshake attempt.
pub struct IssuedChallenge {
    /// Expected response, compared byte-for-byte.
    pub plaintext: String,
    /// The `challenge` message to send to the client.
    pub message: Message,
}

/// Generate a challenge for the given identity and wrap it for the wire.
pub fn issue_challenge(identity: &ClientIdentity) -> TetherResult<IssuedChallenge> {
    let plaintext = crypto::generate_challenge();
    let encrypted = crypto::encrypt_challenge(&plaintext, &identity.public_key_pem)?;
    Ok(IssuedChallenge {
        plaintext,
        message: Message::Challenge { data: encrypted },
    })
}

/// Check a handshake response against the issued challenge. Anything but
/// a `challenge_response` carrying the exact plaintext fails.
pub fn verify_response(response: &Message, expected_plaintext: &str) -> bool {
    match response {
        Message::ChallengeResponse { data } => data == expected_plaintext,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> (crypto::RsaPrivateKey, ClientIdentity) {
        let (private_pem, public_pem) = crypto::generate_keypair(1024).unwrap();
        let key = crypto::parse_private_key(&private_pem).unwrap();
        (
            key,
            ClientIdentity {
                id: "alpha".into(),
                space_id: "s1".into(),
                public_key_pem: public_pem,
            },
        )
    }

    #[test]
    fn holder_of_key_can_answer() {
        let (key, identity) = test_identity();
        let issued = issue_challenge(&identity).unwrap();

        let encrypted = match &issued.message {
            Message::Challenge { data } => data.clone(),
            other => panic!("expected challenge, got {}", other.kind()),
        };
        let answer = crypto::decrypt_challenge(&encrypted, &key).unwrap();
        assert!(verify_response(
            &Message::ChallengeResponse { data: answer },
            &issued.plaintext
        ));
    }

    #[test]
    fn wrong_plaintext_fails() {
        let (_, identity) = test_identity();
        let issued = issue_challenge(&identity).unwrap();
        assert!(!verify_response(
            &Message::ChallengeResponse {
                data: "guess".into()
            },
            &issued.plaintext
        ));
    }

    #[test]
    fn non_response_message_fails() {
        let (_, identity) = test_identity();
        let issued = issue_challenge(&identity).unwrap();
        assert!(!verify_response(
            &Message::Auth {
                data: issued.plaintext.clone()
            },
            &issued.plaintext
        ));
    }

    #[test]
    fn each_handshake_gets_fresh_challenge() {
        let (_, identity) = test_identity();
        let a = issue_challenge(&identity).unwrap();
        let b = issue_challenge(&identity).unwrap();
        assert_ne!(a.plaintext, b.plaintext);
    }
}
