use kstring::KString;

/// Conversion into `KString` that, unlike `From`, also accepts
/// non-static `&str` (via `KString::from_ref`).
pub trait IntoKString {
    fn into_kstring(self) -> KString;
}

impl IntoKString for &str {
    fn into_kstring(self) -> KString {
        KString::from_ref(self)
    }
}

impl IntoKString for &&str {
    fn into_kstring(self) -> KString {
        KString::from_ref(*self)
    }
}

impl IntoKString for String {
    fn into_kstring(self) -> KString {
        KString::from_string(self)
    }
}

impl IntoKString for &String {
    fn into_kstring(self) -> KString {
        KString::from_ref(self)
    }
}

impl IntoKString for KString {
    fn into_kstring(self) -> KString {
        self
    }
}

impl IntoKString for &KString {
    fn into_kstring(self) -> KString {
        self.clone()
    }
}
