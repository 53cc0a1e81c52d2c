//! Types of WebAssembly values and functions, as compared during linking.

/// Describes the type of a function parameter or result, or of a global.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(clippy::exhaustive_enums)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

impl core::fmt::Display for ValType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::V128 => "v128",
            Self::FuncRef => "funcref",
            Self::ExternRef => "externref",
        })
    }
}

/// Describes the parameter and result types of a WebAssembly function.
///
/// Linking requires function types to match exactly.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
#[allow(clippy::exhaustive_structs)]
pub struct FuncType {
    #[allow(missing_docs)]
    pub params: Box<[ValType]>,
    #[allow(missing_docs)]
    pub results: Box<[ValType]>,
}

impl FuncType {
    /// Creates a new function type.
    pub fn new(
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// Parses a native function signature, such as `"(ii)i"` or `"($*)"`.
    ///
    /// Parameters are described by `i` (`i32`), `I` (`i64`), `f` (`f32`), `F` (`f64`), `*` (a
    /// pointer into linear memory), `~` (the length of the preceding pointer's buffer), or `$` (a
    /// pointer to a NUL-terminated string). The latter three are all passed as `i32`. At most one
    /// result may follow the closing parenthesis.
    ///
    /// Returns `None` if the signature is malformed.
    pub fn from_signature(signature: &str) -> Option<Self> {
        fn val_type(c: char) -> Option<ValType> {
            Some(match c {
                'i' | '*' | '~' | '$' => ValType::I32,
                'I' => ValType::I64,
                'f' => ValType::F32,
                'F' => ValType::F64,
                _ => return None,
            })
        }

        let signature = signature.strip_prefix('(')?;
        let (params, results) = signature.split_once(')')?;
        let params = params.chars().map(val_type).collect::<Option<Box<[_]>>>()?;
        let results = results.chars().map(val_type).collect::<Option<Box<[_]>>>()?;

        if results.len() > 1 {
            return None;
        }

        Some(Self { params, results })
    }

    /// Returns `true` if the function type is described by the native `signature`.
    pub fn matches_signature(&self, signature: &str) -> bool {
        Self::from_signature(signature).is_some_and(|parsed| &parsed == self)
    }
}

impl core::fmt::Display for FuncType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("(param")?;

        for ty in self.params.iter() {
            write!(f, " {ty}")?;
        }

        f.write_str(") (result")?;

        for ty in self.results.iter() {
            write!(f, " {ty}")?;
        }

        f.write_str(")")
    }
}
