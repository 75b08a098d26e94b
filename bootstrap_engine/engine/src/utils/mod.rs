pub mod keynames;
