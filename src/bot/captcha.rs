//! CAPTCHA prompt generation and answer hashing.
//!
//! Arithmetic answers range over roughly a thousand values and text answers over 32^6,
//! so the stored hash only keeps raw answers out of the database. It does not resist an
//! offline search: what bounds guessing is the per-challenge attempt ceiling and expiry.

use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::models::CaptchaKind;

const TEXT_LEN: usize = 6;
const TEXT_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug)]
pub struct GeneratedCaptcha {
    pub prompt: String,
    pub answer: String,
}

pub fn generate<R: Rng + ?Sized>(kind: CaptchaKind, rng: &mut R) -> GeneratedCaptcha {
    match kind {
        CaptchaKind::Arithmetic => match rng.gen_range(0..3) {
            0 => {
                let a: u32 = rng.gen_range(10..=499);
                let b: u32 = rng.gen_range(10..=499);
                GeneratedCaptcha {
                    prompt: format!("{a} + {b}"),
                    answer: (a + b).to_string(),
                }
            }
            1 => {
                let a: u32 = rng.gen_range(10..=999);
                let b: u32 = rng.gen_range(10..=999);
                let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
                GeneratedCaptcha {
                    prompt: format!("{hi} - {lo}"),
                    answer: (hi - lo).to_string(),
                }
            }
            _ => {
                let a: u32 = rng.gen_range(11..=99);
                let b: u32 = rng.gen_range(2..=9);
                GeneratedCaptcha {
                    prompt: format!("{a} x {b}"),
                    answer: (a * b).to_string(),
                }
            }
        },
        CaptchaKind::Text => {
            let text: String = (0..TEXT_LEN)
                .filter_map(|_| {
                    TEXT_ALPHABET
                        .get(rng.gen_range(0..TEXT_ALPHABET.len()))
                        .map(|&b| b as char)
                })
                .collect();
            GeneratedCaptcha {
                prompt: text.clone(),
                answer: text,
            }
        }
    }
}

/// Canonical form of a user answer: whitespace dropped, letters upper-cased.
#[must_use]
pub fn normalize_answer(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Hash bound to the challenge id so equal answers never share a hash.
#[must_use]
pub fn answer_hash(challenge_id: Uuid, answer: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(format!("captcha:v1|{challenge_id}|{}", normalize_answer(answer)).as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn arithmetic_answers_are_non_negative_and_correct() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let captcha = generate(CaptchaKind::Arithmetic, &mut rng);
            let answer: i64 = captcha.answer.parse().expect("numeric answer");
            assert!(answer >= 0);
            let parts: Vec<&str> = captcha.prompt.split_whitespace().collect();
            let (a, op, b) = (parts[0], parts[1], parts[2]);
            let a: i64 = a.parse().expect("lhs");
            let b: i64 = b.parse().expect("rhs");
            let expected = match op {
                "+" => a + b,
                "-" => a - b,
                "x" => a * b,
                other => panic!("unexpected operator {other}"),
            };
            assert_eq!(expected, answer);
        }
    }

    #[test]
    fn arithmetic_answers_are_not_a_small_set() {
        let mut rng = StdRng::seed_from_u64(3);
        let answers: HashSet<String> = (0..2000)
            .map(|_| generate(CaptchaKind::Arithmetic, &mut rng).answer)
            .collect();
        assert!(answers.len() > 300, "only {} distinct answers", answers.len());
        assert!(answers
            .iter()
            .any(|a| a.parse::<u32>().expect("numeric answer") > 100));
    }

    #[test]
    fn text_uses_unambiguous_alphabet() {
        let mut rng = StdRng::seed_from_u64(11);
        let captcha = generate(CaptchaKind::Text, &mut rng);
        assert_eq!(captcha.answer.len(), TEXT_LEN);
        assert!(captcha
            .answer
            .bytes()
            .all(|b| TEXT_ALPHABET.contains(&b)));
    }

    #[test]
    fn hash_is_bound_to_challenge_and_normalized() {
        let id = Uuid::new_v4();
        assert_eq!(answer_hash(id, "ab c9"), answer_hash(id, "ABC9"));
        assert_ne!(answer_hash(id, "ABC9"), answer_hash(Uuid::new_v4(), "ABC9"));
    }
}
