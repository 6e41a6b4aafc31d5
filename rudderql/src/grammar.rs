use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "rudderql.pest"]
pub struct PatternParser;
