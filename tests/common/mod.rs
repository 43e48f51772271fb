#![allow(dead_code)]

pub(crate) mod keys;

pub(crate) mod logging;

pub(crate) mod node;
