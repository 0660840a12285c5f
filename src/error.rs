//! The error kinds raised by the engine itself. Errors from user
//! callbacks travel through `anyhow` untouched; these can be told
//! apart via `err.downcast_ref::<FractalError>()`.

use kstring::KString;

/// Define an error type wrapper e.g. `Foo` around a `Box<FooKind>`,
/// with `FooKind` deriving `thiserror::Error`. `Deref` and `From`
/// make the kind transparently accessible, and keep the wrapper one
/// word wide so that `Result`s stay small.
macro_rules! def_boxed_thiserror {
    ($wrappername:ident, $(#[$meta:meta])* pub enum $kindname:ident {$($body:tt)*}) => {
        #[derive(thiserror::Error, Debug)]
        $(#[$meta])*
        pub enum $kindname {
            $($body)*
        }

        #[derive(Debug)]
        pub struct $wrappername(Box<$kindname>);

        impl $wrappername {
            pub fn kind(&self) -> &$kindname {
                &self.0
            }
        }

        impl std::ops::Deref for $wrappername {
            type Target = $kindname;

            fn deref(&self) -> &Self::Target {
                &*self.0
            }
        }

        impl<E> From<E> for $wrappername where $kindname: From<E> {
            fn from(err: E) -> Self {
                $wrappername(Box::new($kindname::from(err)))
            }
        }

        impl std::error::Error for $wrappername {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                self.0.source()
            }
        }

        impl std::fmt::Display for $wrappername {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Don't use the fmt method call, it can be ambiguous
                std::fmt::Display::fmt(&*self.0, f)
            }
        }
    }
}

def_boxed_thiserror!(FractalError, pub enum FractalErrorKind {
    // Definition errors
    #[error("duplicate template name \"{name}\" in \"{path}\"")]
    DuplicateBranch { path: KString, name: KString },
    #[error("view \"{name}\" is already defined for template \"{path}\"")]
    DuplicateView { path: KString, name: KString },
    #[error("template \"{path}\" references \"{target}\", which does not exist")]
    ReferenceNotFound { path: KString, target: KString },
    #[error("template \"{path}\" is part of a reference cycle")]
    ReferenceCycle { path: KString },
    #[error("template \"{path}\" references \"{target}\" and must be empty")]
    ReferenceHasContent { path: KString, target: KString },
    #[error("mixin \"{name}\" is already defined")]
    DuplicateMixin { name: KString },
    #[error("unknown mixin \"{name}\"")]
    UnknownMixin { name: KString },
    #[error("view of class \"{class}\" does not have mixin \"{name}\"")]
    MixinMissing { class: KString, name: KString },

    // Resolution errors
    #[error("template \"{path}\" not found")]
    TemplateNotFound { path: KString },
    #[error("template \"{name}\" is not unique in its scope")]
    TemplateNotUnique { name: KString },
    #[error("no local template \"{name}\" found in the parent view")]
    NoLocalTemplate { name: KString },
    #[error("illegal view path \"{path}\", expecting \"template.path#viewName\"")]
    IllegalViewPath { path: KString },
    #[error("view \"{name}\" not found for template \"{path}\"")]
    ViewNotFound { path: KString, name: KString },
    #[error("view name \"{name}\" is ambiguous, defined for {}", itertools::join(.paths, ", "))]
    AmbiguousView { name: KString, paths: Vec<KString> },

    // Usage errors
    #[error("templates have not been scanned yet")]
    NotScanned,
    #[error("templates have already been scanned")]
    AlreadyScanned,
    #[error("view {view} has been destroyed")]
    StaleView { view: String },
    #[error("the root view can't be {action}")]
    RootView { action: &'static str },
    #[error("view of class \"{class}\" has no method \"{name}\"")]
    UnknownMethod { class: KString, name: KString },

    // Variable substitution
    #[error("unknown modifier \"{name}\"")]
    UnknownModifier { name: KString },
    #[error("variable syntax error in {source_text:?} at position {position}: {message}")]
    VariableSyntax { source_text: String, position: usize, message: String },
});

impl FractalErrorKind {
    pub fn error(self) -> anyhow::Error {
        FractalError::from(self).into()
    }

    pub fn err<T>(self) -> anyhow::Result<T> {
        Err(self.error())
    }
}

/// The engine error kind carried by `e`, if any.
pub fn error_kind(e: &anyhow::Error) -> Option<&FractalErrorKind> {
    e.downcast_ref::<FractalError>().map(|e| e.kind())
}
