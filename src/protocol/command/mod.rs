mod column_definition;
pub mod prepared;
pub mod query;
pub mod resultset;
pub mod utility;

pub use column_definition::ColumnDefinitionBytes;
pub use column_definition::ColumnDefinitionTail;
pub use column_definition::ColumnTypeAndFlags;
pub use column_definition::write_column_definition;
pub use resultset::{ResultDecoder, ResultEvent, ResultState};
