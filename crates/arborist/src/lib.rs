#![doc = include_str!("../README.md")]
//!
//! # 모듈 구조
//!
//! - [`error`]: 도메인 에러 (`ArboristError`)
//! - [`config`]: 설정 (`ArboristConfig`, 빌더)
//! - [`spec`]: 의존성 지정자와 npm 버전 범위 (`Spec`, `Range`)
//! - [`manifest`]: `package.json`과 packument (`Manifest`, `Packument`)
//! - [`graph`]: 노드/엣지 arena 트리 (`Tree`, `Node`, `Edge`, `Inventory`)
//! - [`overrides`]: override 규칙 (`OverrideSet`)
//! - [`shrinkwrap`]: lockfile v1/v2/v3 및 hidden lockfile (`Shrinkwrap`)
//! - [`registry`]: 메타데이터 제공자 (`MetadataProvider`, `MemoryRegistry`, `DirRegistry`)
//! - [`fs`]: 파일시스템 제공자 (`Filesystem`, `LocalFilesystem`)
//! - [`integrity`]: SRI 계산과 검증
//! - [`ideal`]: ideal tree 구성 (`IdealTreeBuilder`)
//! - [`actual`]: 디스크에서 트리 읽기 (`ActualLoader`)
//! - [`virtual_tree`]: lockfile에서 트리 복원 (`load_virtual`)
//! - [`diff`]: 트리 비교 (`Diff`)
//! - [`reify`]: 파일시스템 반영 (`Reifier`)
//! - [`audit`]: 보안 감사 (`Auditor`, `AuditReport`)
//! - [`arborist`]: 프로젝트 단위 작업 (`Arborist`, `ArboristBuilder`)
//!
//! # 처리 흐름
//!
//! ```text
//! package.json + lockfile ──> load_virtual ──┐
//!                                            ├──> IdealTreeBuilder ──> ideal tree
//! node_modules ─────────────> ActualLoader ──┘                            │
//!        │                                                                │
//!        └──────────────────> actual tree ──────> Diff <──────────────────┘
//!                                                  │
//!                                               Reifier ──> node_modules, lockfiles
//! ```

pub mod actual;
pub mod arborist;
pub mod audit;
pub mod config;
pub mod diff;
pub mod error;
pub mod fs;
pub mod graph;
pub mod ideal;
pub mod integrity;
pub mod manifest;
pub mod overrides;
pub mod registry;
pub mod reify;
pub mod shrinkwrap;
pub mod spec;
pub mod virtual_tree;

// --- Public API Re-exports ---

// 오케스트레이터
pub use arborist::{Arborist, ArboristBuilder, AuditOutcome, InstallOutcome};

// 설정
pub use config::{ArboristConfig, ArboristConfigBuilder};

// 에러
pub use error::ArboristError;

// 그래프
pub use graph::{DepError, Edge, EdgeId, Node, NodeId, Problem, ProblemKind, Tree};

// 로더와 구성
pub use actual::ActualLoader;
pub use ideal::{AddRequest, IdealOptions, IdealTreeBuilder, IdealTreeOutcome, UpdateRequest};
pub use virtual_tree::load_virtual;

// diff와 반영
pub use diff::{Diff, DiffAction};
pub use reify::{LogScriptRunner, ReifyOptions, ReifyReport, Reifier, ScriptCall, ScriptRunner};

// 감사
pub use audit::{AdvisoryDb, AuditReport, Auditor, FixAvailable, Vuln};

// 외부 제공자
pub use fs::{Filesystem, LocalFilesystem};
pub use manifest::{Manifest, Packument};
pub use registry::{DirRegistry, MemoryRegistry, MetadataProvider};
pub use shrinkwrap::Shrinkwrap;
