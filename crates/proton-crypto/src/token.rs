//! Session token generation.

/// Token length in characters
pub const TOKEN_LENGTH: usize = 40;

/// Characters a token is drawn from (ASCII letters)
pub const TOKEN_ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above this are discarded so every letter is equally likely.
const REJECTION_BOUND: u8 = (256 / TOKEN_ALPHABET.len() * TOKEN_ALPHABET.len()) as u8;

/// Random bytes requested per refill
const BATCH_SIZE: usize = 64;

/// Generate a token from caller-provided entropy.
///
/// `fill` is called with a scratch buffer until enough bytes survive
/// rejection sampling. Production callers pass a CSPRNG; tests pass a seeded
/// generator.
pub fn generate_token(mut fill: impl FnMut(&mut [u8])) -> String {
    let mut token = String::with_capacity(TOKEN_LENGTH);
    let mut batch = [0u8; BATCH_SIZE];

    while token.len() < TOKEN_LENGTH {
        fill(&mut batch);

        for byte in batch {
            if byte >= REJECTION_BOUND {
                continue;
            }

            token.push(char::from(TOKEN_ALPHABET[usize::from(byte) % TOKEN_ALPHABET.len()]));
            if token.len() == TOKEN_LENGTH {
                break;
            }
        }
    }

    token
}

/// Whether `candidate` has the shape of an issued token.
///
/// Lets callers reject garbage before touching storage.
pub fn is_well_formed_token(candidate: &str) -> bool {
    candidate.len() == TOKEN_LENGTH && candidate.bytes().all(|b| b.is_ascii_alphabetic())
}
