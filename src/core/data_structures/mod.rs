/*!
 * Specialized Data Structures
 * Allocation-avoiding building blocks for hot paths
 */

mod inline_string;

pub use inline_string::InlineString;
