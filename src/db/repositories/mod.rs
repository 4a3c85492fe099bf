mod events;
mod window_locks;
