pub use crate::{key::Key, tree::Tree};
