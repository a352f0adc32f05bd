//! 세션 코드 생성

use rand::seq::SliceRandom;
use rand::Rng;

const SESSION_WORDS: &[&str] = &[
    "groove", "backbeat", "shuffle", "vamp", "tremolo", "bridge", "coda", "riff", "downbeat",
    "encore", "falsetto", "harmony", "jam", "reprise", "swing", "tempo",
];

/// `<word>-<3자리 숫자>` 형식의 공유용 코드
pub fn generate_session_code() -> String {
    let mut rng = rand::thread_rng();
    let word = SESSION_WORDS.choose(&mut rng).copied().unwrap_or("jam");
    let num: u16 = rng.gen_range(0..1000);
    format!("{}-{:03}", word, num)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_code_format() {
        for _ in 0..50 {
            let code = generate_session_code();
            let (word, num) = code.split_once('-').expect("missing separator");
            assert!(SESSION_WORDS.contains(&word));
            assert_eq!(num.len(), 3);
            assert!(num.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
