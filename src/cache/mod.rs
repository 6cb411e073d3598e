pub mod key;
pub mod path;
pub mod store;

pub use key::{BaselineCache, CacheKey, CompileEnv, build_key, digest_hex};
pub use path::{FORMAT_VERSION, ensure_dir, entry_file_name};
pub use store::{CacheStore, Lookup};
