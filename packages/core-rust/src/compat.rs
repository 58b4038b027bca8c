//! Structural compatibility checking between type descriptors.
//!
//! Used to verify that the output type of one pipeline stage can feed the
//! input type of the next. The check is tolerant of unknown placeholders on
//! either side and reports which side was unknown so the caller can decide
//! whether a runtime value check is still needed.

use std::fmt;

use crate::descriptor::TypeDescriptor;

/// Outcome of a successful compatibility comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// The two trees match node for node.
    Exact,
    /// Somewhere the source side was an unknown placeholder.
    SourceUnknown,
    /// Somewhere the target side was an unknown placeholder.
    TargetUnknown,
    /// Both sides contained unknown placeholders (possibly in different branches).
    BothUnknown,
}

impl Verdict {
    /// Combines the verdicts of two branches of the same comparison.
    ///
    /// `Exact` is the identity, `BothUnknown` absorbs everything, and a
    /// `SourceUnknown` meeting a `TargetUnknown` escalates to `BothUnknown`.
    #[must_use]
    pub fn fold(self, other: Verdict) -> Verdict {
        match (self, other) {
            (Verdict::Exact, v) | (v, Verdict::Exact) => v,
            (a, b) if a == b => a,
            _ => Verdict::BothUnknown,
        }
    }

    #[must_use]
    pub fn is_exact(self) -> bool {
        self == Verdict::Exact
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Exact => "exact",
            Verdict::SourceUnknown => "source-unknown",
            Verdict::TargetUnknown => "target-unknown",
            Verdict::BothUnknown => "both-unknown",
        };
        f.write_str(s)
    }
}

/// What disagreed at the failing node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    /// Different main types, neither side unknown.
    MainType { source_main: String, target_main: String },
    /// Same main type, different number of subtypes.
    Arity { source_arity: usize, target_arity: usize },
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchKind::MainType {
                source_main,
                target_main,
            } => write!(f, "'{source_main}' is not '{target_main}'"),
            MismatchKind::Arity {
                source_arity,
                target_arity,
            } => write!(
                f,
                "{source_arity} type argument(s) where {target_arity} expected"
            ),
        }
    }
}

/// Fatal structural incompatibility.
///
/// `path` is the sequence of subtype indices from the root to the node where
/// the comparison failed; empty means the roots themselves disagreed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("type '{source_type}' is incompatible with '{target_type}' at {}: {kind}", render_path(.path))]
pub struct TypeMismatchError {
    pub source_type: TypeDescriptor,
    pub target_type: TypeDescriptor,
    pub path: Vec<usize>,
    pub kind: MismatchKind,
}

fn render_path(path: &[usize]) -> String {
    if path.is_empty() {
        return "root".to_string();
    }
    let parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    format!("path [{}]", parts.join("."))
}

/// Pluggable comparison strategy.
///
/// The runtime holds an `Arc<dyn CompatibilityChecker>` so tests can swap in
/// a counting or always-failing implementation.
pub trait CompatibilityChecker: Send + Sync {
    /// Compares a producer (`source`) type against a consumer (`target`) type.
    ///
    /// # Errors
    ///
    /// Returns [`TypeMismatchError`] when the trees are structurally incompatible.
    fn compare(
        &self,
        source: &TypeDescriptor,
        target: &TypeDescriptor,
    ) -> Result<Verdict, TypeMismatchError>;
}

/// Default checker: recursive structural comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralChecker;

impl CompatibilityChecker for StructuralChecker {
    fn compare(
        &self,
        source: &TypeDescriptor,
        target: &TypeDescriptor,
    ) -> Result<Verdict, TypeMismatchError> {
        compare(source, target)
    }
}

/// Structural comparison of two descriptor trees.
///
/// # Errors
///
/// Returns [`TypeMismatchError`] on an arity mismatch under equal main types,
/// or on differing main types where neither side is unknown.
pub fn compare(
    source: &TypeDescriptor,
    target: &TypeDescriptor,
) -> Result<Verdict, TypeMismatchError> {
    let mut path = Vec::new();
    compare_at(source, target, source, target, &mut path)
}

fn compare_at(
    source: &TypeDescriptor,
    target: &TypeDescriptor,
    source_root: &TypeDescriptor,
    target_root: &TypeDescriptor,
    path: &mut Vec<usize>,
) -> Result<Verdict, TypeMismatchError> {
    let mismatch = |path: &[usize], kind| TypeMismatchError {
        source_type: source_root.clone(),
        target_type: target_root.clone(),
        path: path.to_vec(),
        kind,
    };

    if source.main_type() != target.main_type() {
        return if source.is_unknown() {
            Ok(Verdict::SourceUnknown)
        } else if target.is_unknown() {
            Ok(Verdict::TargetUnknown)
        } else {
            Err(mismatch(
                path,
                MismatchKind::MainType {
                    source_main: source.main_type().to_string(),
                    target_main: target.main_type().to_string(),
                },
            ))
        };
    }

    let (source_subs, target_subs) = (source.sub_types(), target.sub_types());
    if source_subs.len() != target_subs.len() {
        return Err(mismatch(
            path,
            MismatchKind::Arity {
                source_arity: source_subs.len(),
                target_arity: target_subs.len(),
            },
        ));
    }

    let mut verdict = Verdict::Exact;
    for (index, (s, t)) in source_subs.iter().zip(target_subs).enumerate() {
        path.push(index);
        let child = compare_at(s, t, source_root, target_root, path)?;
        path.pop();
        // No early exit on BothUnknown: later branches can still mismatch.
        verdict = verdict.fold(child);
    }
    Ok(verdict)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
