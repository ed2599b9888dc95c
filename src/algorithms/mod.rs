pub mod dijkstra;

pub use dijkstra::{PathError, ShortestPath, calculate_distances, shortest_path};
