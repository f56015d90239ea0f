use crate::backup::ledger::Method;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Regex(#[from] regex::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[cfg(feature = "mysql")]
    #[error(transparent)]
    Mysql(#[from] mysql::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("nothing to archive, every entry under the root is excluded")]
    NothingToArchive,
    #[error("{} exited with {}:\n{}", tool.display(), status, indent::indent_all_with("  ", output))]
    ToolFailed {
        tool: PathBuf,
        status: ExitStatus,
        output: String,
    },
    #[error("{method} did not produce a verified {} at {}", method.stage(), path.display())]
    Unverified { method: Method, path: PathBuf },
    #[error("database driver {0:?} is not available in this build")]
    DriverUnavailable(&'static str),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the innermost cause is [`Error::NothingToArchive`].
    pub fn is_nothing_to_archive(&self) -> bool {
        match self {
            Error::NothingToArchive => true,
            Error::WithMsg { error, .. } | Error::WithDebugObjAndFnName { error, .. } => {
                error.is_nothing_to_archive()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_with_msg_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error).with_msg("Opening archive failed");
        let error_str = error.to_string();

        assert!(error_str.contains("Opening archive failed"));
        assert!(error_str.contains("  file not found"));
    }

    #[test]
    fn test_error_with_debug_object_and_fn_name() {
        let error = Error::NothingToArchive.with_debug_object_and_fn_name("/srv/site", "archive");

        match &error {
            Error::WithDebugObjAndFnName { fn_name, .. } => assert_eq!(fn_name, "archive"),
            _ => panic!("Expected WithDebugObjAndFnName error"),
        }
        assert!(error.to_string().contains("\"/srv/site\" archive failed"));
    }

    #[test]
    fn test_nothing_to_archive_survives_wrapping() {
        let error = Error::NothingToArchive
            .with_msg("zip-writer")
            .with_debug_object_and_fn_name(42, "archive");
        assert!(error.is_nothing_to_archive());
        assert!(!Error::config("bad").is_nothing_to_archive());
    }
}
