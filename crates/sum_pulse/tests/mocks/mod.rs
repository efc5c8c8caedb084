pub mod datastore;
pub mod summarizer;
pub mod tokenizer;
