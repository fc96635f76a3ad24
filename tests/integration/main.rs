//! Integration tests: the full run pipeline against scripted providers.

mod end_to_end;
mod mock_provider;
