pub mod roster_reader;
pub mod roster_writer;
