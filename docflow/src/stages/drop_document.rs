use docflow_pipeline::{ChildDocuments, Stage, StageError};
use docflow_shared::Document;

/// Marks every document it sees as dropped. Combine with conditions to drop
/// selectively.
#[derive(Debug, Default)]
pub struct DropDocument;

impl Stage for DropDocument {
    fn process_document(&mut self, doc: &mut Document) -> Result<Option<ChildDocuments>, StageError> {
        doc.set_dropped(true);
        Ok(None)
    }
}
