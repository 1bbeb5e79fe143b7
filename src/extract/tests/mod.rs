mod extraction_tests;
mod url_tests;
