#![allow(dead_code)]
use std::fs;
use std::path::Path;

use xlang::Dialect;
use xlang::ast::Program;

pub const WORKLOADS: [(&str, &str); 2] = [
    ("primes", "benches/workloads/primes.xl"),
    ("countdown", "benches/workloads/countdown.xb"),
];

pub fn workloads() -> impl Iterator<Item = (&'static str, &'static str, Dialect)> {
    WORKLOADS
        .into_iter()
        .map(|(label, path)| (label, path, Dialect::from_path(Path::new(path))))
}

pub fn load_source(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|err| panic!("read {path}: {err}"))
}

pub fn load_program(path: &str, dialect: Dialect) -> Program {
    let source = load_source(path);
    xlang::parse_source(&source, dialect).unwrap_or_else(|err| panic!("parse {path}: {err}"))
}
