pub mod id_gen;
