use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::ModelError,
    fingerprint::{Fingerprint, FingerprintBuilder},
};

/// Compiler family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolchainKind {
    #[default]
    Unknown,
    Gnu,
    Clang,
    /// Synthetic toolchain used by test agents.
    Test,
    /// Synthetic toolchain whose "compile" is a sleep; used for load testing.
    Sleep,
}

impl ToolchainKind {
    /// Returns the kind as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolchainKind::Unknown => "unknown",
            ToolchainKind::Gnu => "gnu",
            ToolchainKind::Clang => "clang",
            ToolchainKind::Test => "test",
            ToolchainKind::Sleep => "sleep",
        }
    }
}

impl fmt::Display for ToolchainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolchainKind {
    type Err = ModelError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "gnu" | "gcc" => Ok(Self::Gnu),
            "clang" => Ok(Self::Clang),
            "test" => Ok(Self::Test),
            "sleep" => Ok(Self::Sleep),
            _ => Err(ModelError::UnknownKind(s.to_string())),
        }
    }
}

/// Source language a toolchain compiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolchainLang {
    #[default]
    Unknown,
    C,
    Cxx,
    /// Driver that accepts several languages (e.g. a clang that handles both C and C++).
    Multi,
}

impl ToolchainLang {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolchainLang::Unknown => "unknown",
            ToolchainLang::C => "c",
            ToolchainLang::Cxx => "cxx",
            ToolchainLang::Multi => "multi",
        }
    }
}

impl fmt::Display for ToolchainLang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolchainLang::Unknown => "Unknown",
            ToolchainLang::C => "C",
            ToolchainLang::Cxx => "CXX",
            ToolchainLang::Multi => "Multi",
        };
        f.write_str(s)
    }
}

impl FromStr for ToolchainLang {
    type Err = ModelError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "c" => Ok(Self::C),
            "cxx" | "c++" | "cpp" => Ok(Self::Cxx),
            "multi" => Ok(Self::Multi),
            _ => Err(ModelError::UnknownLang(s.to_string())),
        }
    }
}

/// Description of a compiler installation advertised by an agent or a consumerd.
///
/// Identity is defined by every field except [`Toolchain::executable`]:
/// two descriptors of the same compiler installed at different paths are interchangeable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toolchain {
    pub kind: ToolchainKind,
    pub lang: ToolchainLang,
    pub target_arch: String,
    pub version: String,
    #[serde(default)]
    pub pic_default: bool,
    #[serde(default)]
    pub pie_default: bool,
    /// Location of the compiler on the advertising machine. Not part of identity.
    #[serde(default)]
    pub executable: PathBuf,
}

impl Toolchain {
    /// Deterministic digest over the identity fields, in a fixed order.
    pub fn fingerprint(&self) -> Fingerprint {
        FingerprintBuilder::new()
            .field(self.kind.as_str().as_bytes())
            .field(self.lang.as_str().as_bytes())
            .field(self.target_arch.as_bytes())
            .field(self.version.as_bytes())
            .flag(self.pic_default)
            .flag(self.pie_default)
            .finish()
    }

    /// Returns `true` if both descriptors name the same compiler, ignoring the executable path.
    ///
    /// Agrees with [`Toolchain::fingerprint`]: `a.equivalent_to(b)` iff `a.fingerprint() == b.fingerprint()`.
    pub fn equivalent_to(&self, other: &Toolchain) -> bool {
        self.kind == other.kind
            && self.lang == other.lang
            && self.target_arch == other.target_arch
            && self.version == other.version
            && self.pic_default == other.pic_default
            && self.pie_default == other.pie_default
    }
}

impl fmt::Display for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/v{}",
            self.kind, self.lang, self.target_arch, self.version
        )
    }
}

/// Set of toolchains advertised by one party.
///
/// Equivalent descriptors are collapsed on insertion, so every element maps to a distinct route.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Toolchain>", into = "Vec<Toolchain>")]
pub struct Toolchains(Vec<Toolchain>);

impl Toolchains {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a toolchain unless an equivalent one is already present.
    ///
    /// Returns `true` if the set changed.
    pub fn insert(&mut self, tc: Toolchain) -> bool {
        if self.contains(&tc) {
            return false;
        }
        self.0.push(tc);
        true
    }

    /// Returns `true` if an equivalent toolchain is present.
    pub fn contains(&self, tc: &Toolchain) -> bool {
        self.0.iter().any(|t| t.equivalent_to(tc))
    }

    /// Look up a member by fingerprint.
    pub fn find(&self, fp: &Fingerprint) -> Option<&Toolchain> {
        self.0.iter().find(|t| &t.fingerprint() == fp)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Toolchain> {
        self.0.iter()
    }
}

impl FromIterator<Toolchain> for Toolchains {
    fn from_iter<I: IntoIterator<Item = Toolchain>>(iter: I) -> Self {
        let mut set = Toolchains::new();
        for tc in iter {
            set.insert(tc);
        }
        set
    }
}

impl From<Vec<Toolchain>> for Toolchains {
    fn from(value: Vec<Toolchain>) -> Self {
        value.into_iter().collect()
    }
}

impl From<Toolchains> for Vec<Toolchain> {
    fn from(value: Toolchains) -> Self {
        value.0
    }
}

impl<'a> IntoIterator for &'a Toolchains {
    type Item = &'a Toolchain;
    type IntoIter = std::slice::Iter<'a, Toolchain>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn clang_c() -> Toolchain {
        Toolchain {
            kind: ToolchainKind::Clang,
            lang: ToolchainLang::C,
            target_arch: "amd64".into(),
            version: "1.0".into(),
            pic_default: true,
            pie_default: false,
            executable: "/usr/bin/clang".into(),
        }
    }

    #[test]
    fn executable_path_is_not_identity() {
        let a = clang_c();
        let mut b = clang_c();
        b.executable = "/opt/llvm/bin/clang".into();

        assert!(a.equivalent_to(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn every_identity_field_changes_fingerprint() {
        let base = clang_c();
        let variants = [
            Toolchain { kind: ToolchainKind::Gnu, ..clang_c() },
            Toolchain { lang: ToolchainLang::Cxx, ..clang_c() },
            Toolchain { target_arch: "aarch64".into(), ..clang_c() },
            Toolchain { version: "1.1".into(), ..clang_c() },
            Toolchain { pic_default: false, ..clang_c() },
            Toolchain { pie_default: true, ..clang_c() },
        ];

        for v in variants {
            assert!(!base.equivalent_to(&v), "{v} should not be equivalent to {base}");
            assert_ne!(base.fingerprint(), v.fingerprint(), "{v} collided with {base}");
        }
    }

    #[test]
    fn combinatorial_fingerprints_are_distinct() {
        let kinds = [
            ToolchainKind::Clang,
            ToolchainKind::Gnu,
            ToolchainKind::Sleep,
            ToolchainKind::Test,
        ];
        let langs = [
            ToolchainLang::C,
            ToolchainLang::Cxx,
            ToolchainLang::Multi,
            ToolchainLang::Unknown,
        ];
        let versions = ["7", "8", "9", "10", "10.1", "test"];
        let arches = ["amd64", "aarch64", "testarch"];

        let mut all = Vec::new();
        for (i, kind) in kinds.iter().enumerate() {
            for lang in langs {
                for version in versions {
                    for arch in arches {
                        all.push(Toolchain {
                            kind: *kind,
                            lang,
                            target_arch: arch.into(),
                            version: version.into(),
                            pic_default: i % 2 == 0,
                            pie_default: false,
                            executable: format!("/bin/cc-{}-{version}-{arch}", all.len()).into(),
                        });
                    }
                }
            }
        }

        let unique: HashSet<Fingerprint> = all.iter().map(Toolchain::fingerprint).collect();
        assert_eq!(unique.len(), all.len());

        for a in &all {
            for b in &all {
                assert_eq!(a.equivalent_to(b), a.fingerprint() == b.fingerprint());
            }
        }
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(clang_c().to_string(), "clang/C/amd64/v1.0");
    }

    #[test]
    fn set_collapses_equivalent_entries() {
        let mut other_path = clang_c();
        other_path.executable = "/usr/local/bin/clang".into();
        let gnu = Toolchain { kind: ToolchainKind::Gnu, ..clang_c() };

        let set: Toolchains = vec![clang_c(), other_path, gnu.clone()].into();

        assert_eq!(set.len(), 2);
        assert!(set.contains(&gnu));
        assert_eq!(set.find(&gnu.fingerprint()), Some(&gnu));
    }

    #[test]
    fn set_deserialization_collapses_duplicates() {
        let json = serde_json::to_string(&vec![clang_c(), clang_c()]).unwrap();
        let set: Toolchains = serde_json::from_str(&json).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn kind_and_lang_parse_aliases() {
        assert_eq!("GCC".parse::<ToolchainKind>().unwrap(), ToolchainKind::Gnu);
        assert_eq!("c++".parse::<ToolchainLang>().unwrap(), ToolchainLang::Cxx);
        assert!("fortran".parse::<ToolchainLang>().is_err());
    }
}
