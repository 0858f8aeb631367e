mod controller;
mod memory;
mod stream;
mod stuck;
mod tools;
mod window;
