
mod shared_backend;
