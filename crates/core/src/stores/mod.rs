pub mod pinecone;

pub use pinecone::{PineconeClient, PineconeConfig, PineconeIndex};
