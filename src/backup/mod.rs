pub mod archive;
pub mod backup_config;
pub mod database;
pub mod exclude;
pub mod job;
pub mod ledger;
pub mod path;
pub mod probe;
pub mod redacted;
pub mod result_error;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
