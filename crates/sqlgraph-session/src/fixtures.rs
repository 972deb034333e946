//! Shared test fixtures.

use sqlgraph_core::{
    AssociationDescriptor, EntityDescriptor, Error, IdGeneration, LinkTable, Outcome, Registry,
    ScalarProperty, SqlType, Value,
};
use sqlgraph_memory::MemoryStore;

/// Books reference their publisher by local key and own chapters and notes
/// by remote key; authors and tags are shared through link tables.
pub(crate) fn library() -> Registry {
    Registry::builder()
        .register(
            EntityDescriptor::new("Publisher", "publishers")
                .scalar(ScalarProperty::new("name", SqlType::Text))
                .scalar(ScalarProperty::new("city", SqlType::Text).nullable(true))
                .association(AssociationDescriptor::many("books", "Book").remote_fk("publisher_id"))
                .unique_key(&["name"]),
        )
        .register(
            EntityDescriptor::new("Book", "books")
                .scalar(ScalarProperty::new("title", SqlType::Text))
                .scalar(ScalarProperty::new("year", SqlType::Integer).nullable(true))
                .association(AssociationDescriptor::one("publisher", "Publisher").local_fk("publisher_id"))
                .association(
                    AssociationDescriptor::many("chapters", "Chapter")
                        .remote_fk("book_id")
                        .nullable(false),
                )
                .association(
                    AssociationDescriptor::many("notes", "Note").remote_fk("book_id"),
                )
                .association(
                    AssociationDescriptor::many("authors", "Author")
                        .link_table(LinkTable::new("book_authors", "book_id", "author_id")),
                )
                .association(
                    AssociationDescriptor::many("tags", "Tag")
                        .link_table(LinkTable::new("book_tags", "book_id", "tag_code")),
                ),
        )
        .register(
            EntityDescriptor::new("Chapter", "chapters")
                .scalar(ScalarProperty::new("heading", SqlType::Text)),
        )
        .register(
            EntityDescriptor::new("Note", "notes").scalar(ScalarProperty::new("body", SqlType::Text)),
        )
        .register(
            EntityDescriptor::new("Author", "authors")
                .scalar(ScalarProperty::new("name", SqlType::Text))
                .association(AssociationDescriptor::one("mentor", "Author").local_fk("mentor_id")),
        )
        .register(
            EntityDescriptor::new("Tag", "tags")
                .id("code", SqlType::Text, IdGeneration::Assigned)
                .scalar(ScalarProperty::new("label", SqlType::Text)),
        )
        .build()
        .expect("library registry")
}

pub(crate) fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub(crate) fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

pub(crate) fn seed_id(store: &MemoryStore, table: &'static str, values: Vec<(&'static str, Value)>) -> Value {
    store
        .seed(table, values)
        .expect("seed")
        .generated_id
        .expect("generated id")
}
