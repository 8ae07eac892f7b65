#![no_main]

use grove_arborist::{Manifest, Shrinkwrap, load_virtual};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(lock) = Shrinkwrap::from_json("fuzz/package-lock.json", content) else {
        return;
    };

    // 파싱된 lockfile은 트리로 불러와 다시 직렬화할 수 있어야 함
    let root = Manifest {
        name: "fuzz".to_owned(),
        version: "1.0.0".to_owned(),
        ..Manifest::default()
    };
    if let Ok(tree) = load_virtual("/fuzz", root, &lock, false) {
        for version in 1..=3 {
            let _ = Shrinkwrap::from_tree(&tree, version).to_json(version);
        }
    }
});
