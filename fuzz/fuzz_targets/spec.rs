#![no_main]

use arbitrary::Arbitrary;
use grove_arborist::spec::{Spec, parse_version};
use libfuzzer_sys::fuzz_target;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    name: String,
    raw: String,
    /// 범위 매칭 대상 버전 후보
    version: String,
    other: String,
}

fuzz_target!(|input: FuzzInput| {
    let Ok(spec) = Spec::parse(&input.name, &input.raw) else {
        return;
    };
    let _ = spec.is_registry();
    let _ = spec.registry_name();

    if let Some(version) = parse_version(&input.version) {
        let _ = spec.satisfied_by(&version);
    }
    if let Ok(other) = Spec::parse(&input.name, &input.other) {
        let _ = spec.intersects(&other);
    }
});
