//! Shared test support: a fixture type system and graph helpers.
