use mongres_ql::DocumentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOneResult {
    pub inserted_id: DocumentId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
}

/// `modified_count` only counts documents whose content actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    pub deleted_count: u64,
}
