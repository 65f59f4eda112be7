mod editing;
mod execution;
