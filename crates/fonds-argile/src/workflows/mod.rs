pub mod parcours;
