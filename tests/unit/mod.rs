mod explain;
mod statements;
