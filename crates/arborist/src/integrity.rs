//! Subresource Integrity (SRI) 계산 및 검증
//!
//! `sha512-<base64>` 형식의 integrity 문자열을 다룹니다. 여러 해시가 공백으로
//! 나열된 경우 지원하는 알고리즘 중 가장 강한 것으로 검증합니다.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// 지원하는 해시 알고리즘 (약한 것부터)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn digest(self, data: &[u8]) -> String {
        match self {
            Self::Sha256 => STANDARD.encode(Sha256::digest(data)),
            Self::Sha384 => STANDARD.encode(Sha384::digest(data)),
            Self::Sha512 => STANDARD.encode(Sha512::digest(data)),
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

/// 데이터의 sha512 integrity 문자열을 계산합니다.
pub fn sha512(data: &[u8]) -> String {
    format!("sha512-{}", Algorithm::Sha512.digest(data))
}

/// integrity 검증 실패
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// 기대한 integrity
    pub expected: String,
    /// 같은 알고리즘으로 계산한 실제 값
    pub actual: String,
}

/// 데이터가 기대한 integrity와 일치하는지 검증합니다.
///
/// 지원하는 알고리즘이 하나도 없으면 검증할 수 없으므로 불일치로 취급하며,
/// 이때 `actual`은 sha512 값입니다.
pub fn verify(data: &[u8], expected: &str) -> Result<(), Mismatch> {
    let mut strongest: Option<(Algorithm, Vec<&str>)> = None;
    for token in expected.split_whitespace() {
        let Some((algo, hash)) = token.split_once('-') else {
            continue;
        };
        let Some(algo) = Algorithm::parse(algo) else {
            continue;
        };
        // 옵션 접미어 (`?opt`) 제거
        let hash = hash.split('?').next().unwrap_or(hash);
        let stronger = strongest.as_ref().is_none_or(|(best, _)| algo > *best);
        if stronger {
            strongest = Some((algo, vec![hash]));
        } else if let Some((best, hashes)) = &mut strongest
            && *best == algo
        {
            hashes.push(hash);
        }
    }

    let Some((algo, hashes)) = strongest else {
        return Err(Mismatch {
            expected: expected.to_owned(),
            actual: sha512(data),
        });
    };
    let actual = algo.digest(data);
    if hashes.contains(&actual.as_str()) {
        Ok(())
    } else {
        Err(Mismatch {
            expected: expected.to_owned(),
            actual: format!("{}-{actual}", algo.prefix()),
        })
    }
}

/// 두 integrity 문자열이 같은 내용을 가리키는지 반환합니다.
///
/// 공통 알고리즘의 해시가 하나라도 같으면 같은 내용으로 봅니다.
pub fn same(a: &str, b: &str) -> bool {
    a.split_whitespace()
        .any(|x| b.split_whitespace().any(|y| x == y))
}
