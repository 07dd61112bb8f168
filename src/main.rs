use loadmesh::error::AppResult;

fn main() -> AppResult<()> {
    loadmesh::entry::run()
}
