#![allow(dead_code)]

use sqlgraph::prelude::*;
use sqlgraph_memory::MemoryStore;

/// A small catalogue: publishers own nothing, books own chapters and notes,
/// books share authors and tags through link tables.
pub fn catalogue() -> Registry {
    Registry::builder()
        .register(
            EntityDescriptor::new("Publisher", "publishers")
                .scalar(ScalarProperty::new("name", SqlType::Text))
                .scalar(ScalarProperty::new("city", SqlType::Text).nullable(true))
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
                .association(AssociationDescriptor::many("notes", "Note").remote_fk("book_id"))
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
        .register(EntityDescriptor::new("Note", "notes").scalar(ScalarProperty::new("body", SqlType::Text)))
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
        .expect("catalogue registry")
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Err(e) => e,
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn seed(store: &MemoryStore, table: &'static str, values: Vec<(&'static str, Value)>) -> Value {
    store
        .seed(table, values)
        .expect("seed row")
        .generated_id
        .expect("generated id")
}

/// A new book with one of everything.
pub fn dune() -> Instance {
    Instance::new("Book")
        .set("title", "Dune")
        .set("year", 1965_i32)
        .one(
            "publisher",
            Instance::new("Publisher").set("name", "Chilton").set("city", "Philadelphia"),
        )
        .many(
            "chapters",
            vec![
                Instance::new("Chapter").set("heading", "Arrakis"),
                Instance::new("Chapter").set("heading", "Muad'Dib"),
            ],
        )
        .many(
            "tags",
            vec![
                Instance::new("Tag").with_id("desert").set("label", "Desert"),
                Instance::new("Tag").with_id("epic").set("label", "Epic"),
            ],
        )
}
